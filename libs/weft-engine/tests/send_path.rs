//! End-to-end send-path scenarios: two extensions wired into one graph,
//! messages dispatched through their env handles.

use std::time::Duration;

use tokio::sync::mpsc;

use weft_api::error::ErrorCode;
use weft_api::msg::{Cmd, CmdResult, Data, Loc, Msg, StatusCode};
use weft_api::value::Value;
use weft_engine::{App, Engine, Extension, OwnerEnv};

/// Events a probe extension reports back to the test.
#[derive(Debug)]
enum Event {
    Cmd { name: String, cmd_id: String },
    Data { name: String, properties: Value },
}

/// Records every inbound message; replies to commands with a configurable
/// number of streamed results before the terminal one (0 = terminal only,
/// `None` = never reply).
struct Probe {
    events: mpsc::UnboundedSender<Event>,
    streamed_replies: Option<u32>,
}

impl Probe {
    fn reporting(events: mpsc::UnboundedSender<Event>) -> Probe {
        Probe { events, streamed_replies: Some(0) }
    }

    fn streaming(events: mpsc::UnboundedSender<Event>, n: u32) -> Probe {
        Probe { events, streamed_replies: Some(n) }
    }

    fn silent(events: mpsc::UnboundedSender<Event>) -> Probe {
        Probe { events, streamed_replies: None }
    }
}

impl Extension for Probe {
    fn on_cmd(&mut self, env: &mut OwnerEnv<'_>, cmd: Cmd) {
        let _ = self.events.send(Event::Cmd {
            name: cmd.header.name.clone(),
            cmd_id: cmd.cmd_id.clone(),
        });

        let Some(streamed) = self.streamed_replies else {
            // Never reply; the out path on the sender side must expire.
            return;
        };
        for seq in 0..streamed {
            let mut partial = CmdResult::continued_from_cmd(&cmd, StatusCode::Ok);
            partial
                .header
                .properties
                .object_move("seq", Value::from(seq as u64))
                .unwrap();
            env.return_result(partial).unwrap();
        }
        let mut done = CmdResult::from_cmd(&cmd, StatusCode::Ok);
        done.header
            .properties
            .object_move("seq", Value::from(streamed as u64))
            .unwrap();
        env.return_result(done).unwrap();
    }

    fn on_data(&mut self, _env: &mut OwnerEnv<'_>, data: Data) {
        let _ = self.events.send(Event::Data {
            name: data.header.name.clone(),
            properties: data.header.properties.clone(),
        });
    }
}

async fn graph() -> (App, Engine) {
    let app = App::new("test://send-path");
    let engine = app.start_graph("g1").await.unwrap();
    (app, engine)
}

fn cmd_to(name: &str, dest: &str) -> Msg {
    let mut msg: Msg = Cmd::create(name).unwrap().into();
    msg.set_dests(vec![Loc::extension(dest)]);
    msg
}

#[tokio::test]
async fn send_cmd_assigns_a_uuid_cmd_id() {
    let (app, engine) = graph().await;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let env_a = engine
        .add_extension("grp", "a", Box::new(Probe::reporting(events_tx.clone())), Value::empty_object(), None)
        .await
        .unwrap();
    let _env_b = engine
        .add_extension("grp", "b", Box::new(Probe::reporting(events_tx)), Value::empty_object(), None)
        .await
        .unwrap();

    // The command leaves with an empty cmd_id; the send path must fill it.
    let Msg::Cmd(cmd) = cmd_to("ping", "b") else { unreachable!() };
    assert!(cmd.cmd_id.is_empty());

    let rx = env_a.send_cmd(cmd).await.unwrap();
    let result = rx.await.unwrap();
    assert_eq!(result.status_code, StatusCode::Ok);

    let Some(Event::Cmd { cmd_id, .. }) = events_rx.recv().await else {
        panic!("receiver saw no command");
    };
    // UUID-shaped: the router never observes an empty id.
    assert!(uuid::Uuid::parse_str(&cmd_id).is_ok(), "cmd_id '{cmd_id}' is not a uuid");
    assert_eq!(result.cmd_id, cmd_id);

    app.close().await;
}

#[tokio::test]
async fn send_cmd_sees_only_the_terminal_result() {
    let (app, engine) = graph().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let env_a = engine
        .add_extension("grp", "a", Box::new(Probe::reporting(events_tx.clone())), Value::empty_object(), None)
        .await
        .unwrap();
    let _env_b = engine
        .add_extension("grp", "b", Box::new(Probe::streaming(events_tx, 2)), Value::empty_object(), None)
        .await
        .unwrap();

    let Msg::Cmd(cmd) = cmd_to("job", "b") else { unreachable!() };
    let rx = env_a.send_cmd(cmd).await.unwrap();

    // Two intermediate results are absorbed; the oneshot resolves exactly
    // once, on the completed result.
    let result = rx.await.unwrap();
    assert!(result.is_completed && result.is_final);
    assert_eq!(result.header.properties.object_peek("seq"), Some(&Value::Uint64(2)));

    app.close().await;
}

#[tokio::test]
async fn send_cmd_ex_sees_every_result() {
    let (app, engine) = graph().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let env_a = engine
        .add_extension("grp", "a", Box::new(Probe::reporting(events_tx.clone())), Value::empty_object(), None)
        .await
        .unwrap();
    let _env_b = engine
        .add_extension("grp", "b", Box::new(Probe::streaming(events_tx, 2)), Value::empty_object(), None)
        .await
        .unwrap();

    let Msg::Cmd(cmd) = cmd_to("job", "b") else { unreachable!() };
    let mut rx = env_a.send_cmd_ex(cmd).await.unwrap();

    let mut seen = Vec::new();
    while let Some(result) = rx.recv().await {
        seen.push((result.is_completed, result.header.properties.object_peek("seq").cloned()));
    }

    // One event per received result with the matching cmd_id, and the
    // stream closes after the terminal result.
    assert_eq!(
        seen,
        vec![
            (false, Some(Value::Uint64(0))),
            (false, Some(Value::Uint64(1))),
            (true, Some(Value::Uint64(2))),
        ]
    );

    app.close().await;
}

#[tokio::test]
async fn not_connected_sends_keep_failing_with_msg_not_connected() {
    let (app, engine) = graph().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let env_a = engine
        .add_extension("grp", "a", Box::new(Probe::reporting(events_tx)), Value::empty_object(), None)
        .await
        .unwrap();

    for _ in 0..50 {
        let err = env_a.send_msg(cmd_to("nowhere", "missing")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::MsgNotConnected);
    }

    app.close().await;
}

#[tokio::test]
async fn ingress_schema_adjusts_and_placeholders_resolve() {
    let (app, engine) = graph().await;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let env_a = engine
        .add_extension("grp", "a", Box::new(Probe::reporting(events_tx.clone())), Value::empty_object(), None)
        .await
        .unwrap();

    let api = Value::from_json_str(
        r#"{
            "data_in": [
                { "name": "samples", "property": { "count": { "type": "int32" } } }
            ]
        }"#,
    )
    .unwrap();
    let _env_b = engine
        .add_extension("grp", "b", Box::new(Probe::reporting(events_tx)), Value::empty_object(), Some(&api))
        .await
        .unwrap();

    let mut msg: Msg = Data::create("samples").unwrap().into();
    msg.set_dests(vec![Loc::extension("b")]);
    msg.set_property("count", Value::Uint64(7)).unwrap();
    msg.set_property("greeting", Value::from("${env:WEFT_TEST_GREETING|hi}"))
        .unwrap();
    env_a.send_msg(msg).await.unwrap();

    let Some(Event::Data { name, properties }) = events_rx.recv().await else {
        panic!("receiver saw no data");
    };
    assert_eq!(name, "samples");
    // The ingress schema narrowed the count, and the placeholder resolved
    // to its default after adjustment.
    assert_eq!(properties.object_peek("count"), Some(&Value::Int32(7)));
    assert_eq!(properties.object_peek("greeting"), Some(&Value::from("hi")));

    app.close().await;
}

#[tokio::test]
async fn fan_out_delivers_one_clone_per_destination() {
    let (app, engine) = graph().await;
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let env_a = engine
        .add_extension("grp", "a", Box::new(Probe::reporting(events_tx.clone())), Value::empty_object(), None)
        .await
        .unwrap();
    for name in ["b", "c"] {
        engine
            .add_extension("grp", name, Box::new(Probe::reporting(events_tx.clone())), Value::empty_object(), None)
            .await
            .unwrap();
    }

    let mut msg: Msg = Data::create("blast").unwrap().into();
    msg.set_dests(vec![Loc::extension("b"), Loc::extension("c")]);
    env_a.send_msg(msg).await.unwrap();

    let mut seen = 0;
    while seen < 2 {
        match events_rx.recv().await {
            Some(Event::Data { name, .. }) => {
                assert_eq!(name, "blast");
                seen += 1;
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    app.close().await;
}

#[tokio::test]
async fn unreplied_command_path_expires_with_an_error_result() {
    let (app, engine) = graph().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    // 100ms out-path timeout, 50ms sweep interval.
    let props = Value::from_json_str(
        r#"{"_weft":{"path_timeout":{"out_path":100000},"path_check_interval":50000}}"#,
    )
    .unwrap();

    let env_a = engine
        .add_extension("grp", "a", Box::new(Probe::reporting(events_tx.clone())), props, None)
        .await
        .unwrap();
    let _env_b = engine
        .add_extension("grp", "b", Box::new(Probe::silent(events_tx)), Value::empty_object(), None)
        .await
        .unwrap();

    let Msg::Cmd(cmd) = cmd_to("never_answered", "b") else { unreachable!() };
    let rx = env_a.send_cmd(cmd).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .expect("path sweep did not run")
        .expect("expired path must deliver a result");
    assert_eq!(result.status_code, StatusCode::Error);
    assert!(result.is_completed);

    app.close().await;
}

#[tokio::test]
async fn closed_app_answers_env_operations_with_closed() {
    let (app, engine) = graph().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let env_a = engine
        .add_extension("grp", "a", Box::new(Probe::reporting(events_tx)), Value::empty_object(), None)
        .await
        .unwrap();

    app.close().await;
    // Give the close cascade a beat to cancel the extension runloops.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(env_a.is_closed());

    let err = env_a.send_msg(cmd_to("late", "b")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Closed);

    let err = env_a.get_property("anything").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Closed);
}

#[tokio::test]
async fn close_app_admin_command_closes_everything() {
    let (app, engine) = graph().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let env_a = engine
        .add_extension("grp", "a", Box::new(Probe::reporting(events_tx)), Value::empty_object(), None)
        .await
        .unwrap();

    app.env().send_msg(Cmd::close_app()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(env_a.is_closed());
    assert!(app.env().is_closed());
}

#[tokio::test]
async fn sent_results_are_rejected_on_the_send_path() {
    let (app, engine) = graph().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let env_a = engine
        .add_extension("grp", "a", Box::new(Probe::reporting(events_tx)), Value::empty_object(), None)
        .await
        .unwrap();

    let cmd = Cmd::create("x").unwrap();
    let result = CmdResult::from_cmd(&cmd, StatusCode::Ok);
    let err = env_a.send_msg(result).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Generic);

    app.close().await;
}

#[tokio::test]
async fn locked_messages_are_rejected_on_the_send_path() {
    let (app, engine) = graph().await;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();

    let env_a = engine
        .add_extension("grp", "a", Box::new(Probe::reporting(events_tx.clone())), Value::empty_object(), None)
        .await
        .unwrap();
    let _env_b = engine
        .add_extension("grp", "b", Box::new(Probe::reporting(events_tx)), Value::empty_object(), None)
        .await
        .unwrap();

    let mut data = Data::create("payload").unwrap();
    data.alloc_buf(4);
    let _ = data.lock_buf().unwrap();
    let mut msg: Msg = data.into();
    msg.set_dests(vec![Loc::extension("b")]);

    let err = env_a.send_msg(msg).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Generic);

    app.close().await;
}
