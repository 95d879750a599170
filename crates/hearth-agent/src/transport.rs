//! Frame send/receive over a WebSocket stream, shared by both sides of the
//! session. Generalized over any `Sink`/`Stream` of tungstenite messages so
//! the same helpers serve the agent's client role and the orchestrator's
//! accept-loop role.

use async_tungstenite::tungstenite::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Error, Result};

/// Serialize `value` to JSON text and send it as one WebSocket frame.
pub async fn send<S, T>(ws: &mut S, value: &T) -> Result<()>
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
    T: Serialize,
{
    let text = serde_json::to_string(value).map_err(|e| Error::Session(e.to_string()))?;
    ws.send(Message::Text(text.into()))
        .await
        .map_err(|e| Error::Connection(e.to_string()))
}

/// Receive and deserialize the next JSON text frame, skipping pings/pongs at
/// the WebSocket protocol level (not to be confused with the application's
/// own `ping`/`pong` events).
pub async fn recv<S, T>(ws: &mut S) -> Result<Option<T>>
where
    S: Stream<Item = std::result::Result<Message, async_tungstenite::tungstenite::Error>> + Unpin,
    T: DeserializeOwned,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                let value = serde_json::from_str(&text).map_err(|e| Error::Session(e.to_string()))?;
                return Ok(Some(value));
            }
            Some(Ok(Message::Close(_))) => return Ok(None),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(Error::Connection(e.to_string())),
            None => return Ok(None),
        }
    }
}
