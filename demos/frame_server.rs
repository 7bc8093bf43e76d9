//! Frame-based request/response server.
//!
//! Every request is a DATA frame whose body is a JSON [`Request`]; every
//! response is a DATA frame holding a JSON [`Response`]. A malformed frame
//! header closes the connection.

use anyhow::Result;
use gothic::frame::{encode_data, FrameReader, FrameType};
use gothic::prelude::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Echo { message: String },
    Add { a: i64, b: i64 },
    Shutdown,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Echo { message: String },
    Sum { result: i64 },
    Bye,
    Error { message: String },
}

struct FrameServer;

impl FrameServer {
    fn handle(&self, body: &[u8]) -> (Response, Action) {
        match serde_json::from_slice::<Request>(body) {
            Ok(Request::Echo { message }) => (Response::Echo { message }, Action::None),
            Ok(Request::Add { a, b }) => (
                Response::Sum {
                    result: a.wrapping_add(b),
                },
                Action::None,
            ),
            Ok(Request::Shutdown) => (Response::Bye, Action::Shutdown),
            Err(e) => (
                Response::Error {
                    message: e.to_string(),
                },
                Action::None,
            ),
        }
    }
}

impl Events for FrameServer {
    fn serving(&self, server: &Server) -> Action {
        tracing::info!("frame server listening on {:?}", server.addrs());
        Action::None
    }

    fn opened(&self, conn: &mut Conn) -> (Vec<u8>, Action) {
        conn.set_context(FrameReader::new());
        (Vec::new(), Action::None)
    }

    fn data(&self, conn: &mut Conn, input: &[u8]) -> (Vec<u8>, Action) {
        let Some(reader) = conn.context_mut::<FrameReader>() else {
            return (Vec::new(), Action::Close);
        };

        let mut out = Vec::new();
        let mut action = Action::None;
        let fed = reader.feed(input, |frame| {
            if frame.header.kind != FrameType::Data {
                tracing::debug!("ignoring {} frame", frame.header.kind);
                return;
            }
            let (response, next) = self.handle(frame.payload);
            if let Ok(body) = serde_json::to_vec(&response) {
                if let Ok(encoded) = encode_data(&body) {
                    out.extend_from_slice(&encoded);
                }
            }
            if next != Action::None {
                action = next;
            }
        });

        match fed {
            Ok(_) => (out, action),
            Err(e) => {
                tracing::warn!("closing {}: {e}", conn.id());
                (out, Action::Close)
            }
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tcp://127.0.0.1:9001".to_string());
    serve(FrameServer, &[addr.as_str()])?;
    Ok(())
}
