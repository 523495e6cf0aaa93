use std::sync::Arc;

use geomlink_engine::bulk::{BulkChannel, BulkChannelError, BulkKey, BulkRegistry, MemoryBulkChannel};
use geomlink_engine::geom::{MeshPayload, PointSetPayload};
use geomlink_engine::protocol::{Codec, Message, PointData, ProtocolError};
use geomlink_engine::scene::{Embedding, GeometryPayload, GeometryView, Point, Scene, SceneError};
use geomlink_engine::session::{Session, SessionError, SessionOptions, SessionState};

fn line_embedding() -> Embedding {
    Embedding::from_points(
        "E",
        vec![
            Point::new(vec![0.0, 0.0, 0.0]),
            Point::new(vec![1.0, 0.0, 0.0]),
            Point::new(vec![2.0, 0.0, 0.0]),
        ],
    )
    .expect("uniform points")
}

fn point_view(name: &str, index_map: Vec<usize>, dynamic: bool) -> GeometryView {
    let payload = PointSetPayload::new(name, vec![vec![0.0; 3]; index_map.len()]);
    GeometryView::new(Box::new(payload), index_map, dynamic).expect("matching map")
}

fn local_coords(scene: &Scene, geometry: &str, local: usize) -> Vec<f64> {
    scene
        .view(geometry)
        .and_then(|view| view.payload().vertex_coords(local))
        .expect("vertex exists")
        .to_vec()
}

#[test]
fn move_vertex_reaches_embedding_and_view() {
    let mut scene = Scene::new("S", line_embedding(), vec![point_view("V", vec![0, 1], true)]).unwrap();

    scene.move_vertex("V", 1, &[5.0, 5.0, 5.0]).unwrap();

    assert_eq!(scene.embedding().coords(1).unwrap(), &[5.0, 5.0, 5.0]);
    assert_eq!(local_coords(&scene, "V", 1), vec![5.0, 5.0, 5.0]);
}

#[test]
fn move_vertex_fans_out_to_every_dynamic_view_sharing_the_vertex() {
    let mesh = MeshPayload::new(
        "M",
        vec![vec![0.0; 3]; 3],
        vec![vec![0, 1, 2]],
    );
    let mesh_view = GeometryView::new(Box::new(mesh), vec![2, 0, 1], true).unwrap();
    let mut scene = Scene::new(
        "S",
        line_embedding(),
        vec![
            point_view("A", vec![1, 2], true),
            mesh_view,
            point_view("Frozen", vec![2], false),
        ],
    )
    .unwrap();

    let target = scene.move_vertex("A", 1, &[0.0, 0.0, 4.0]).unwrap();

    assert_eq!(target, 2);
    assert_eq!(local_coords(&scene, "A", 1), vec![0.0, 0.0, 4.0]);
    assert_eq!(local_coords(&scene, "M", 0), vec![0.0, 0.0, 4.0]);
    assert_eq!(local_coords(&scene, "Frozen", 0), vec![0.0, 0.0, 0.0]);
}

#[test]
fn decode_then_merge_into_empty_scene() {
    let mut session = Session::new(Codec::default(), BulkRegistry::new());

    session.receive_str("n S\np 1 2 3\np 4 5 6 l 0\nx\n").unwrap();

    let embedding = session.scene().unwrap().embedding();
    assert!(embedding.len() >= 2);
    let labeled = embedding
        .points()
        .iter()
        .position(|p| p.label.as_deref() == Some("0"))
        .unwrap();
    assert_eq!(labeled, 0);
    assert_eq!(embedding.coords(0).unwrap(), &[4.0, 5.0, 6.0]);
}

#[test]
fn marked_vertices_in_view_order() {
    let embedding = Embedding::with_len("E", 3, 10);
    let mut scene = Scene::new(
        "S",
        embedding,
        vec![
            point_view("First", vec![0, 3], true),
            point_view("Second", vec![7, 9], true),
        ],
    )
    .unwrap();
    scene.payload_mut("First").unwrap().set_marked(1, true);
    scene.payload_mut("Second").unwrap().set_marked(0, true);

    assert_eq!(scene.get_marked_vertices(), vec!["3".to_owned(), "7".to_owned()]);

    let embedding = scene.embedding();
    assert_eq!(embedding.marked_indices(), vec![3, 7]);
}

#[test]
fn truncated_stream_is_channel_closed() {
    let codec = Codec::default();
    let err = codec.decode_str("n S\np 1 2 3\np 4 5 6\n").unwrap_err();
    assert!(matches!(err, ProtocolError::ChannelClosed { lines_read: 3 }));

    let mut session = Session::new(codec, BulkRegistry::new());
    let err = session.receive_str("n S\np 1 2 3\n").unwrap_err();
    assert!(matches!(
        err,
        SessionError::Protocol(ProtocolError::ChannelClosed { .. })
    ));
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[test]
fn bulk_channel_wins_over_inline_points() {
    let channel = Arc::new(MemoryBulkChannel::new());
    channel.store(BulkKey(5), vec![vec![9.0, 9.0, 9.0], vec![8.0, 8.0, 8.0]]);
    let mut registry = BulkRegistry::new();
    registry.register(BulkKey(5), channel);
    let mut session = Session::new(Codec::default(), registry);

    session
        .receive_str("n S\np 1 1 1\np 2 2 2\np 3 3 3\nP 5\nx\n")
        .unwrap();

    let embedding = session.scene().unwrap().embedding();
    assert_eq!(embedding.len(), 2);
    assert_eq!(embedding.coords(0).unwrap(), &[9.0, 9.0, 9.0]);
    assert_eq!(embedding.coords(1).unwrap(), &[8.0, 8.0, 8.0]);
}

#[test]
fn text_round_trip_keeps_coordinates_and_labels() {
    let embedding = Embedding::from_points(
        "Round",
        vec![
            Point::new(vec![0.1, -2.5, 1e-7]),
            Point::labeled(vec![3.0, 1.0 / 3.0, -0.0], "1"),
            Point::labeled(vec![12_345.678, 0.2, 7.0], "2"),
        ],
    )
    .unwrap();
    let scene = Scene::new("Round", embedding, Vec::new()).unwrap();
    let codec = Codec::default();

    let mut wire = Vec::new();
    codec.write_scene(&mut wire, &scene).unwrap();
    let decoded = codec.read_message(&mut wire.as_slice()).unwrap();

    assert_eq!(decoded.name.as_deref(), Some("Round"));
    let PointData::Inline(points) = decoded.points else {
        panic!("expected inline points");
    };
    assert_eq!(points.len(), 3);
    for (got, want) in points.iter().zip(scene.embedding().points()) {
        assert_eq!(got.label, want.label);
        for (a, b) in got.coords.iter().zip(&want.coords) {
            assert!((a - b).abs() <= f64::EPSILON * b.abs().max(1.0));
        }
    }
}

#[test]
fn repeated_update_is_idempotent() {
    let mut scene = Scene::new(
        "S",
        line_embedding(),
        vec![point_view("A", vec![2, 0], true), point_view("B", vec![0], true)],
    )
    .unwrap();
    let snapshot = Embedding::from_points(
        "S",
        vec![
            Point::labeled(vec![7.0, 0.0, 0.0], "0"),
            Point::labeled(vec![8.0, 0.0, 0.0], "2"),
        ],
    )
    .unwrap();

    scene.update(&snapshot, false).unwrap();
    let first = (local_coords(&scene, "A", 0), local_coords(&scene, "B", 0));
    scene.update(&snapshot, false).unwrap();
    let second = (local_coords(&scene, "A", 0), local_coords(&scene, "B", 0));

    assert_eq!(first, second);
    assert_eq!(first.0, vec![8.0, 0.0, 0.0]);
    assert_eq!(first.1, vec![7.0, 0.0, 0.0]);
}

#[test]
fn non_numeric_label_is_a_typed_error() {
    let mut session = Session::new(Codec::default(), BulkRegistry::new());
    session.receive_str("n S\np 0 0 0\nx\n").unwrap();

    let err = session.receive_str("n S\np 1 1 1 l apex\nx\n").unwrap_err();

    assert!(matches!(
        err,
        SessionError::Scene(SceneError::MalformedLabel(ref label)) if label == "apex"
    ));
    assert_eq!(
        session.scene().unwrap().embedding().coords(0).unwrap(),
        &[0.0, 0.0, 0.0]
    );
}

#[test]
fn snapshot_is_independent_of_live_scene() {
    let channel = Arc::new(MemoryBulkChannel::new());
    channel.store(BulkKey(1), vec![vec![0.0, 0.0, 0.0], vec![1.0, 1.0, 1.0]]);
    let mut session = Session::new(
        Codec::default(),
        BulkRegistry::new().with_fallback(channel.clone()),
    );
    session.receive_str("n S\nP 1\nx\n").unwrap();
    session
        .scene_mut()
        .unwrap()
        .add_view(point_view("V", vec![0, 1], true))
        .unwrap();

    let mut snapshot = session.snapshot().unwrap();
    snapshot.move_vertex("V", 0, &[3.0, 3.0, 3.0]).unwrap();

    assert_eq!(channel.rows(BulkKey(1)).unwrap()[0], vec![0.0, 0.0, 0.0]);
    assert_eq!(
        session.scene().unwrap().embedding().coords(0).unwrap(),
        &[0.0, 0.0, 0.0]
    );
}

#[derive(Debug)]
struct RefusingChannel;

impl BulkChannel for RefusingChannel {
    fn read_into(&self, key: BulkKey, _: &mut Embedding) -> Result<(), BulkChannelError> {
        Err(BulkChannelError::UnknownKey(key))
    }

    fn write_from(&self, _: BulkKey, _: &Embedding) -> Result<(), BulkChannelError> {
        Err(BulkChannelError::Rejected("read-only segment".to_owned()))
    }
}

#[test]
fn failing_bulk_read_surfaces_as_protocol_error() {
    let mut session = Session::new(
        Codec::default(),
        BulkRegistry::new().with_fallback(Arc::new(RefusingChannel)),
    );

    let err = session.receive_str("n S\nP 3\nx\n").unwrap_err();

    assert!(matches!(
        err,
        SessionError::Protocol(ProtocolError::Bulk(BulkChannelError::UnknownKey(BulkKey(3))))
    ));
}

#[test]
fn echo_and_selection_round_trip_through_a_second_session() {
    let mut producer = Session::new(Codec::default(), BulkRegistry::new());
    producer.receive_str("n S\np 0 0 0\np 1 0 0\np 2 0 0\nx\n").unwrap();

    let mut viewer = Session::new(Codec::default(), BulkRegistry::new()).with_options(SessionOptions {
        echo_moves: true,
        ..SessionOptions::default()
    });
    viewer.receive_str("n S\np 0 0 0\np 1 0 0\np 2 0 0\nx\n").unwrap();
    viewer
        .scene_mut()
        .unwrap()
        .add_view(point_view("V", vec![2, 1], true))
        .unwrap();

    let mut wire = Vec::new();
    viewer.move_vertex("V", 0, &[6.0, 6.0, 6.0], &mut wire).unwrap();
    producer.receive(&mut wire.as_slice()).unwrap();

    assert_eq!(
        producer.scene().unwrap().embedding().coords(2).unwrap(),
        &[6.0, 6.0, 6.0]
    );

    viewer
        .scene_mut()
        .unwrap()
        .payload_mut("V")
        .unwrap()
        .set_marked(1, true);
    let mut wire = Vec::new();
    viewer.send_selection(&mut wire).unwrap();
    producer.receive(&mut wire.as_slice()).unwrap();
    assert_eq!(producer.facets(), &[vec![1]]);
}

#[test]
fn message_builder_encodes_like_the_decoder_expects() {
    let codec = Codec::new(["Scale"]);
    let mut message = Message::new().with_name("Params");
    message.parameters.insert("Scale".into(), "1.5".into());

    let text = codec.encode_to_string(&message).unwrap();
    let decoded = codec.decode_str(&text).unwrap();

    assert_eq!(decoded, message);
}

#[test]
fn oversized_label_is_an_error_not_an_allocation() {
    let mut session = Session::new(Codec::default(), BulkRegistry::new());

    let err = session.receive_str("p 1 2 3 l 18446744073709551615\nx\n").unwrap_err();

    assert!(matches!(err, SessionError::Scene(SceneError::IndexOutOfRange { .. })));
    assert_eq!(session.state(), SessionState::Uninitialized);
}

#[test]
fn unnamed_scene_survives_a_round_trip() {
    let mut producer = Session::new(Codec::default(), BulkRegistry::new());
    producer.receive_str("p 1 2 3\np 4 5 6\nx\n").unwrap();
    assert_eq!(producer.scene().unwrap().name(), "");

    let mut wire = Vec::new();
    producer.send_scene(&mut wire).unwrap();
    let mut viewer = Session::new(Codec::default(), BulkRegistry::new());
    viewer.receive(&mut wire.as_slice()).unwrap();

    let embedding = viewer.scene().unwrap().embedding();
    assert_eq!(embedding.len(), 2);
    assert_eq!(embedding.coords(1).unwrap(), &[4.0, 5.0, 6.0]);
}

#[test]
fn multi_line_parameter_value_never_reaches_the_wire() {
    let mut session = Session::new(Codec::new(["Scale"]), BulkRegistry::new());
    assert!(!session.set_parameter("Scale", "1\nx"));

    let codec = Codec::new(["Scale"]);
    let mut message = Message::new();
    message.parameters.insert("Scale".into(), "1\nx".into());
    let mut wire = Vec::new();
    let err = codec.write_message(&mut wire, &message).unwrap_err();

    assert!(matches!(err, ProtocolError::LineBreak { tag: 's' }));
    assert!(wire.is_empty());
}
