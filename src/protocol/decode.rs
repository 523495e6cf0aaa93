use std::io::BufRead;

use crate::bulk::BulkKey;
use crate::scene::Point;

use super::{Codec, Message, PointData, ProtocolError, ProtocolResult, Tag};

impl Codec {
    /// Leest één bericht, tot en met de `x`-regel.
    ///
    /// Einde van de stream vóór `x` geeft [`ProtocolError::ChannelClosed`]; een
    /// read die uitloopt geeft [`ProtocolError::ChannelStalled`].
    pub fn read_message<R: BufRead>(&self, reader: &mut R) -> ProtocolResult<Message> {
        let mut message = Message::default();
        let mut inline = Vec::new();
        let mut discarded = 0usize;
        let mut buf = String::new();
        let mut line_no = 0usize;

        loop {
            buf.clear();
            if reader.read_line(&mut buf)? == 0 {
                return Err(ProtocolError::ChannelClosed {
                    lines_read: line_no,
                });
            }
            line_no += 1;

            let line = buf.trim_end_matches(['\n', '\r']);
            let mut chars = line.chars();
            let Some(first) = chars.next() else {
                continue;
            };
            let args = chars.as_str();

            let Some(tag) = Tag::from_char(first) else {
                log::debug!("line {line_no}: ignoring unknown tag `{first}`");
                continue;
            };

            match tag {
                Tag::End => break,
                Tag::Name => {
                    let name = args.trim();
                    if name.is_empty() {
                        return Err(missing(line_no, tag));
                    }
                    message.name = Some(name.to_owned());
                }
                Tag::Point => {
                    let point = parse_point(args, line_no)?;
                    if matches!(message.points, PointData::Bulk(_)) {
                        discarded += 1;
                        continue;
                    }
                    if let Some(expected) = inline.first().map(Point::dim) {
                        if point.dim() != expected {
                            return Err(ProtocolError::RaggedPoint {
                                line: line_no,
                                expected,
                                found: point.dim(),
                            });
                        }
                    }
                    inline.push(point);
                }
                Tag::Bulk => {
                    let raw = args.trim();
                    if raw.is_empty() {
                        return Err(missing(line_no, tag));
                    }
                    let key = raw
                        .parse::<i64>()
                        .map_err(|source| ProtocolError::InvalidIndex {
                            line: line_no,
                            source,
                        })?;
                    discarded += inline.len();
                    inline.clear();
                    message.points = PointData::Bulk(BulkKey(key));
                }
                Tag::Facet => {
                    let facet = args
                        .split_whitespace()
                        .map(|token| {
                            token
                                .parse::<usize>()
                                .map_err(|source| ProtocolError::InvalidIndex {
                                    line: line_no,
                                    source,
                                })
                        })
                        .collect::<ProtocolResult<Vec<usize>>>()?;
                    message.facets.push(facet);
                }
                Tag::Parameter | Tag::Interactive => {
                    let (key, value) = split_key_value(args).ok_or_else(|| missing(line_no, tag))?;
                    let (declared, store) = if tag == Tag::Parameter {
                        (self.accepts_parameter(key), &mut message.parameters)
                    } else {
                        (self.accepts_interactive(key), &mut message.interactive)
                    };
                    if declared {
                        store.insert(key.to_owned(), value.to_owned());
                    } else {
                        log::debug!("line {line_no}: dropping undeclared parameter `{key}`");
                    }
                }
                Tag::Error => message.error = Some(args.trim().to_owned()),
                Tag::Warning => message.warning = Some(args.trim().to_owned()),
            }
        }

        if discarded > 0 {
            log::debug!("bulk channel takes precedence, discarded {discarded} inline point(s)");
        }
        if !matches!(message.points, PointData::Bulk(_)) && !inline.is_empty() {
            message.points = PointData::Inline(inline);
        }

        log::debug!(
            "decoded message `{}` ({line_no} lines, {} facet(s), {} parameter(s))",
            message.name.as_deref().unwrap_or(""),
            message.facets.len(),
            message.parameters.len() + message.interactive.len(),
        );
        Ok(message)
    }

    /// Decodeert het eerste bericht in `text`.
    pub fn decode_str(&self, text: &str) -> ProtocolResult<Message> {
        self.read_message(&mut text.as_bytes())
    }
}

fn missing(line: usize, tag: Tag) -> ProtocolError {
    ProtocolError::MissingArgument {
        line,
        tag: tag.as_char(),
    }
}

fn parse_point(args: &str, line: usize) -> ProtocolResult<Point> {
    let (numbers, label) = split_label(args);
    let coords = numbers
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|source| ProtocolError::InvalidNumber { line, source })
        })
        .collect::<ProtocolResult<Vec<f64>>>()?;
    if coords.is_empty() {
        return Err(missing(line, Tag::Point));
    }

    match label {
        Some("") => Err(ProtocolError::MissingArgument { line, tag: 'l' }),
        Some(label) => Ok(Point::labeled(coords, label)),
        None => Ok(Point::new(coords)),
    }
}

/// Splitst `" 1 2 3 l name"` in het coördinatendeel en het label (de rest van
/// de regel na `l`).
fn split_label(args: &str) -> (&str, Option<&str>) {
    let trimmed = args.trim_end();
    if trimmed.trim_start() == "l" {
        return ("", Some(""));
    }
    if let Some(numbers) = trimmed.strip_suffix(" l") {
        return (numbers, Some(""));
    }
    match args.split_once(" l ") {
        Some((numbers, label)) => (numbers, Some(label.trim())),
        None => (args, None),
    }
}

fn split_key_value(args: &str) -> Option<(&str, &str)> {
    let args = args.trim();
    if args.is_empty() {
        return None;
    }
    Some(match args.split_once(char::is_whitespace) {
        Some((key, value)) => (key, value.trim()),
        None => (args, ""),
    })
}
