use std::sync::Mutex;

use super::*;
use crate::error::Error;

#[derive(Default)]
struct RecordingLink {
    sent: Mutex<Vec<GatewayFrame>>,
    reconnects: Mutex<usize>,
}

impl GatewayLink for RecordingLink {
    fn send_frame(&self, frame: &GatewayFrame) -> Result<(), Error> {
        self.sent.lock().unwrap().push(frame.clone());
        Ok(())
    }

    fn request_reconnect(&self) {
        *self.reconnects.lock().unwrap() += 1;
    }
}

fn negotiator(config: Config) -> (SessionNegotiator, Arc<RecordingLink>) {
    let link = Arc::new(RecordingLink::default());
    let session = SessionNegotiator::new(link.clone(), Arc::new(config));
    (session, link)
}

#[test]
fn hello_sends_identify_with_token_and_shard() {
    let config = Config::new("secret").unwrap().with_shard(1, 2).unwrap();
    let (session, link) = negotiator(config);

    session.on_frame(&GatewayFrame::hello(41_250));

    let sent = link.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].opcode(), Some(Opcode::Identify));
    assert_eq!(sent[0].d["token"], "secret");
    assert_eq!(sent[0].d["shard"], json!([1, 2]));
    assert_eq!(sent[0].d["compress"], json!(false));
}

#[test]
fn default_shard_pair_is_zero_of_one() {
    let (session, _) = negotiator(Config::new("secret").unwrap());
    assert_eq!(session.identify_frame().d["shard"], json!([0, 1]));
}

#[test]
fn reconnect_and_invalid_session_request_reconnect() {
    let (session, link) = negotiator(Config::new("secret").unwrap());

    session.on_frame(&GatewayFrame::new(Opcode::Reconnect, serde_json::Value::Null));
    session.on_frame(&GatewayFrame::new(Opcode::InvalidSession, json!(false)));

    assert_eq!(*link.reconnects.lock().unwrap(), 2);
    assert!(link.sent.lock().unwrap().is_empty());
}

#[test]
fn other_frames_are_ignored() {
    let (session, link) = negotiator(Config::new("secret").unwrap());

    session.on_frame(&GatewayFrame::heartbeat_ack());
    session.on_frame(&GatewayFrame::dispatch("READY", 1, json!({})));

    assert!(link.sent.lock().unwrap().is_empty());
    assert_eq!(*link.reconnects.lock().unwrap(), 0);
}
