use std::fmt::Write as _;
use std::io::Write;

use crate::scene::{Point, Scene};

use super::{Codec, Message, PointData, ProtocolError, ProtocolResult, Tag};

impl Message {
    /// Momentopname van de embedding van een scene als uitgaand bericht.
    ///
    /// Een bulk-gekoppelde embedding wordt eerst via het kanaal weggeschreven en
    /// daarna met `P <key>` aangeduid. Een naamloze scene krijgt geen `n`-regel.
    pub fn from_scene(scene: &Scene) -> ProtocolResult<Self> {
        let embedding = scene.embedding();
        let points = match embedding.bulk() {
            Some(handle) => {
                handle.write_from(embedding)?;
                PointData::Bulk(handle.key())
            }
            None => PointData::Inline(embedding.points().to_vec()),
        };

        Ok(Self {
            name: Some(scene.name().to_owned()).filter(|name| !name.is_empty()),
            points,
            ..Self::default()
        })
    }
}

impl Codec {
    /// Schrijft `message` gevolgd door de `x`-afsluiter.
    pub fn write_message<W: Write>(&self, writer: &mut W, message: &Message) -> ProtocolResult<()> {
        let text = self.encode_to_string(message)?;
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Schrijft de huidige embedding van de scene als één bericht.
    pub fn write_scene<W: Write>(&self, writer: &mut W, scene: &Scene) -> ProtocolResult<()> {
        let message = Message::from_scene(scene)?;
        self.write_message(writer, &message)
    }

    /// Zet een bericht om naar tekst. Tekstvelden met een regeleinde worden
    /// geweigerd, omdat ze de regelindeling zouden breken.
    pub fn encode_to_string(&self, message: &Message) -> ProtocolResult<String> {
        let mut out = String::new();

        // Een lege naam kan niet gedecodeerd worden, dus die regel vervalt.
        if let Some(name) = message.name.as_deref().filter(|name| !name.is_empty()) {
            push_line(&mut out, Tag::Name, name)?;
        }
        match &message.points {
            PointData::None => {}
            PointData::Inline(points) => {
                for point in points {
                    push_line(&mut out, Tag::Point, &point_args(point))?;
                }
            }
            PointData::Bulk(key) => push_line(&mut out, Tag::Bulk, &key.to_string())?,
        }
        for facet in &message.facets {
            let indices: Vec<String> = facet.iter().map(ToString::to_string).collect();
            push_line(&mut out, Tag::Facet, &indices.join(" "))?;
        }
        for (key, value) in &message.parameters {
            push_line(&mut out, Tag::Parameter, &format!("{key} {value}"))?;
        }
        for (key, value) in &message.interactive {
            push_line(&mut out, Tag::Interactive, &format!("{key} {value}"))?;
        }
        if let Some(error) = message.error.as_deref() {
            push_line(&mut out, Tag::Error, error)?;
        }
        if let Some(warning) = message.warning.as_deref() {
            push_line(&mut out, Tag::Warning, warning)?;
        }
        out.push(Tag::End.as_char());
        out.push('\n');
        Ok(out)
    }
}

/// True when `text` fits on one protocol line.
pub(crate) fn is_single_line(text: &str) -> bool {
    !text.contains(['\n', '\r'])
}

fn push_line(out: &mut String, tag: Tag, args: &str) -> ProtocolResult<()> {
    if !is_single_line(args) {
        return Err(ProtocolError::LineBreak { tag: tag.as_char() });
    }
    out.push(tag.as_char());
    if !args.is_empty() {
        out.push(' ');
        out.push_str(args);
    }
    out.push('\n');
    Ok(())
}

fn point_args(point: &Point) -> String {
    let mut args = String::new();
    for (i, c) in point.coords.iter().enumerate() {
        if i > 0 {
            args.push(' ');
        }
        let _ = write!(args, "{c}");
    }
    if let Some(label) = point.label.as_deref() {
        let _ = write!(args, " l {label}");
    }
    args
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bulk::{BulkHandle, BulkKey, MemoryBulkChannel};
    use crate::scene::Embedding;

    fn scene() -> Scene {
        let embedding = Embedding::from_points(
            "S",
            vec![
                Point::new(vec![0.0, 0.5, -1.0]),
                Point::labeled(vec![1.25, 0.0, 3.0], "1"),
            ],
        )
        .unwrap();
        Scene::new("S", embedding, Vec::new()).unwrap()
    }

    #[test]
    fn inline_scene_text() {
        let text = Codec::default()
            .encode_to_string(&Message::from_scene(&scene()).unwrap())
            .unwrap();
        assert_eq!(text, "n S\np 0 0.5 -1\np 1.25 0 3 l 1\nx\n");
    }

    #[test]
    fn every_field_is_written_in_order() {
        let mut message = Message::new().with_name("S").with_facet(vec![3, 7]);
        message.parameters.insert("Scale".into(), "2".into());
        message.interactive.insert("Explode".into(), "0.5".into());
        message.error = Some("bad".into());
        message.warning = Some("odd".into());

        let text = Codec::default().encode_to_string(&message).unwrap();
        assert_eq!(text, "n S\nf 3 7\ns Scale 2\ni Explode 0.5\ne bad\nw odd\nx\n");
    }

    #[test]
    fn bulk_backed_scene_references_key_and_flushes() {
        let channel = Arc::new(MemoryBulkChannel::new());
        let mut embedding = Embedding::with_len("B", 2, 2);
        embedding.attach_bulk(BulkHandle::new(BulkKey(11), channel.clone()));
        let scene = Scene::new("B", embedding, Vec::new()).unwrap();

        let mut out = Vec::new();
        Codec::default().write_scene(&mut out, &scene).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "n B\nP 11\nx\n");
        assert_eq!(channel.rows(BulkKey(11)).unwrap().len(), 2);
    }

    #[test]
    fn empty_message_is_just_the_terminator() {
        assert_eq!(Codec::default().encode_to_string(&Message::new()).unwrap(), "x\n");
    }

    #[test]
    fn unnamed_scene_round_trips_without_name_line() {
        let embedding = Embedding::from_points("", vec![Point::new(vec![1.0, 2.0, 3.0])]).unwrap();
        let scene = Scene::new("", embedding, Vec::new()).unwrap();
        let codec = Codec::default();

        let text = codec
            .encode_to_string(&Message::from_scene(&scene).unwrap())
            .unwrap();
        assert_eq!(text, "p 1 2 3\nx\n");

        let decoded = codec.decode_str(&text).unwrap();
        assert_eq!(decoded.name, None);
        assert_eq!(
            decoded.points,
            PointData::Inline(vec![Point::new(vec![1.0, 2.0, 3.0])])
        );
        assert_eq!(
            codec.encode_to_string(&Message::new().with_name("")).unwrap(),
            "x\n"
        );
    }

    #[test]
    fn line_breaks_in_text_fields_are_refused() {
        let codec = Codec::default();
        let mut message = Message::new().with_name("S");
        message.parameters.insert("Scale".into(), "1\nx".into());
        assert!(matches!(
            codec.encode_to_string(&message),
            Err(ProtocolError::LineBreak { tag: 's' })
        ));

        let labeled = Message::new().with_points(vec![Point::labeled(vec![0.0; 3], "1\r\nx")]);
        assert!(matches!(
            codec.encode_to_string(&labeled),
            Err(ProtocolError::LineBreak { tag: 'p' })
        ));

        let mut out = Vec::new();
        assert!(codec.write_message(&mut out, &Message::new().with_name("a\nb")).is_err());
        assert!(out.is_empty());
    }
}
