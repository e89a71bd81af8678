use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tower_sessions::Session;
use tracing::{debug, info, warn};

use super::{RoomEngine, SendOptions};
use crate::{
    AppResult, Result,
    ids::{ParticipantId, PeerId, RoomId, TransportHandle},
    protocol::{self, Message, MessageType},
    session,
    transport::ChannelLayer,
};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<String>,
    State(engine): State<Arc<RoomEngine>>,
    State(channels): State<ChannelLayer>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let room_id = RoomId(room_id);
    let participant = session::participant(&session, engine.participants()).await?;
    engine.rooms().get(&room_id).await?;

    Ok(ws
        .on_upgrade(move |socket| serve(socket, engine, channels, room_id, participant.id))
        .into_response())
}

async fn serve(
    socket: WebSocket,
    engine: Arc<RoomEngine>,
    channels: ChannelLayer,
    room_id: RoomId,
    participant: ParticipantId,
) {
    let handle = TransportHandle::generate();
    let mut outbox = channels.register(handle.clone());

    let peer_id = match engine.join(&room_id, participant, &handle).await {
        Ok(peer_id) => peer_id,
        Err(err) => {
            warn!(room = %room_id, %participant, %err, "join failed, closing socket");
            channels.unregister(&handle);
            return;
        }
    };
    if let Err(err) = engine.send_initial_data(&room_id, participant, &peer_id).await {
        warn!(room = %room_id, %peer_id, %err, "could not send initial room data");
    }

    let (mut sender, mut receiver) = socket.split();
    let mut forward_task = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            if sender.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let relay_task = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let frame = match msg {
                WsMessage::Text(frame) => frame,
                WsMessage::Close(_) => break,
                _ => continue,
            };
            if let Err(err) = relay(&engine, &room_id, participant, &peer_id, frame.as_str()).await {
                warn!(room = %room_id, %peer_id, %err, "dropping client frame");
            }
        }
    };

    tokio::select! {
        _ = &mut forward_task => {},
        _ = relay_task => forward_task.abort(),
    }

    if let Err(err) = engine.close_connection(&room_id, &peer_id, &handle).await {
        warn!(room = %room_id, %peer_id, %err, "leave failed");
    }
    channels.unregister(&handle);
    info!(room = %room_id, %peer_id, "socket closed");
}

fn target(message: &Message) -> Option<PeerId> {
    message.payload.get("to")?.as_str().map(PeerId::from)
}

/// Routes one frame from a client.
///
/// `message` and `event` go to the whole room. `signalling` goes to
/// `payload.to` stamped with the sender's peer id. `action` is admin only
/// and goes to `payload.to` when present, else to everyone.
pub(crate) async fn relay(
    engine: &RoomEngine,
    room_id: &RoomId,
    participant: ParticipantId,
    peer_id: &PeerId,
    frame: &str,
) -> Result<()> {
    let mut message = protocol::decode(frame)?;

    match message.kind {
        MessageType::Message | MessageType::Event => {
            engine
                .send(room_id, message, SendOptions::broadcast().sent_by(participant))
                .await?;
        }
        MessageType::Signalling => {
            let Some(to) = target(&message) else {
                warn!(room = %room_id, %peer_id, "signalling without a target");
                return Ok(());
            };
            if let Some(payload) = message.payload.as_object_mut() {
                payload.insert("from".to_owned(), Value::from(peer_id.as_str()));
            }
            engine
                .send(room_id, message, SendOptions::direct(to).sent_by(participant))
                .await?;
        }
        MessageType::Action => {
            if !engine.is_admin(room_id, participant).await? {
                warn!(room = %room_id, %participant, "action from non-admin ignored");
                return Ok(());
            }
            let options = match target(&message) {
                Some(to) => SendOptions::direct(to),
                None => SendOptions::broadcast(),
            };
            engine
                .send(room_id, message, options.sent_by(participant))
                .await?;
        }
        other => debug!(room = %room_id, kind = %other, "ignoring client frame"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::{Error, db, registry::MemoryStore};

    struct Fixture {
        engine: RoomEngine,
        room: RoomId,
        owner: (ParticipantId, PeerId, UnboundedReceiver<String>),
        guest: (ParticipantId, PeerId, UnboundedReceiver<String>),
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(protocol::decode(&frame).unwrap());
        }
        out
    }

    async fn fixture() -> Fixture {
        let db_pool = db::connect_in_memory().await.unwrap();
        let layer = ChannelLayer::new();
        let engine = RoomEngine::new(db_pool, Arc::new(MemoryStore::new()), Arc::new(layer.clone()));

        let ana = engine.participants().create(Some("Ana")).await.unwrap();
        let bob = engine.participants().create(Some("Bob")).await.unwrap();
        let room = engine.create_room(ana.id).await.unwrap();

        let ha = TransportHandle::from("conn.ana");
        let hb = TransportHandle::from("conn.bob");
        let mut ra = layer.register(ha.clone());
        let mut rb = layer.register(hb.clone());
        let pa = engine.join(&room, ana.id, &ha).await.unwrap();
        let pb = engine.join(&room, bob.id, &hb).await.unwrap();
        drain(&mut ra);
        drain(&mut rb);

        Fixture {
            engine,
            room,
            owner: (ana.id, pa, ra),
            guest: (bob.id, pb, rb),
        }
    }

    #[tokio::test]
    async fn chat_reaches_everyone() {
        let mut f = fixture().await;
        let (bob, bob_peer, _) = &f.guest;
        relay(&f.engine, &f.room, *bob, bob_peer, r#"{"t":"m","p":{"text":"hi"}}"#)
            .await
            .unwrap();

        assert_eq!(drain(&mut f.owner.2)[0].payload, json!({"text": "hi"}));
        assert_eq!(drain(&mut f.guest.2).len(), 1);
    }

    #[tokio::test]
    async fn signalling_is_direct_and_stamped() {
        let mut f = fixture().await;
        let (ana_peer, bob_peer) = (f.owner.1.clone(), f.guest.1.clone());
        let frame = json!({"t": "s", "p": {"to": ana_peer, "sdp": "offer"}}).to_string();
        relay(&f.engine, &f.room, f.guest.0, &bob_peer, &frame).await.unwrap();

        let got = drain(&mut f.owner.2);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, MessageType::Signalling);
        assert_eq!(got[0].payload["from"], json!(bob_peer));
        assert!(drain(&mut f.guest.2).is_empty());

        // no target, nothing sent
        relay(&f.engine, &f.room, f.guest.0, &bob_peer, r#"{"t":"s","p":{"sdp":"x"}}"#)
            .await
            .unwrap();
        assert!(drain(&mut f.owner.2).is_empty());
    }

    #[tokio::test]
    async fn actions_need_admin() {
        let mut f = fixture().await;
        let (bob, bob_peer) = (f.guest.0, f.guest.1.clone());
        let (ana, ana_peer) = (f.owner.0, f.owner.1.clone());

        // a guest's action reaches nobody
        relay(&f.engine, &f.room, bob, &bob_peer, r#"{"t":"A","p":{"name":"stop_recording"}}"#)
            .await
            .unwrap();
        assert!(drain(&mut f.owner.2).is_empty());
        assert!(drain(&mut f.guest.2).is_empty());

        let frame = json!({"t": "A", "p": {"name": "kick", "to": bob_peer}}).to_string();
        relay(&f.engine, &f.room, ana, &ana_peer, &frame).await.unwrap();
        let got = drain(&mut f.guest.2);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, MessageType::Action);
        assert_eq!(got[0].action_name(), Some("kick"));
        assert!(drain(&mut f.owner.2).is_empty());

        // no target goes to the whole room
        relay(&f.engine, &f.room, ana, &ana_peer, r#"{"t":"A","p":{"name":"start_recording"}}"#)
            .await
            .unwrap();
        assert_eq!(drain(&mut f.owner.2)[0].action_name(), Some("start_recording"));
        assert_eq!(drain(&mut f.guest.2)[0].action_name(), Some("start_recording"));

        let err = relay(&f.engine, &f.room, ana, &ana_peer, r#"{"t":"A","p":{"name":"dance"}}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidAction(ref name) if name == "dance"));
        assert!(drain(&mut f.owner.2).is_empty());
    }

    #[tokio::test]
    async fn bad_frames_and_server_types() {
        let mut f = fixture().await;
        let (bob, bob_peer) = (f.guest.0, f.guest.1.clone());

        let err = relay(&f.engine, &f.room, bob, &bob_peer, "not json").await.unwrap_err();
        assert!(matches!(err, Error::Codec(ref e) if e.is_decoding()));

        relay(&f.engine, &f.room, bob, &bob_peer, r#"{"t":"l","p":{"id":"spoof"}}"#)
            .await
            .unwrap();
        assert!(drain(&mut f.owner.2).is_empty());
    }
}
