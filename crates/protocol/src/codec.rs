//! JSON envelope codec.

use crate::{Command, Envelope, ProtocolError, ServerMessage};

/// Decode one inbound text frame into a command envelope.
pub fn decode_command(text: &str) -> Result<Envelope<Command>, ProtocolError> {
    if text.trim().is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode one outbound message.
pub fn encode_message(message: &Envelope<ServerMessage>) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Event, Item, ItemLocation, Reply, TilePoint};

    #[test]
    fn test_decode_move_item() {
        let text = r#"{"id":7,"data":{"type":"moveItem","args":{
            "from":{"source":"world","loc":{"w":0,"x":1,"y":2,"z":0}},
            "to":{"source":"container","id":4}}}}"#;
        let envelope = decode_command(text).unwrap();
        assert_eq!(envelope.id, Some(7));
        assert_eq!(
            envelope.data,
            Command::MoveItem {
                from: ItemLocation::world(TilePoint::new(0, 1, 2, 0)),
                to: ItemLocation::container(4, None),
            }
        );
    }

    #[test]
    fn test_decode_use_defaults_usage_index() {
        let text = r#"{"data":{"type":"use","args":{"toolIndex":-1,
            "location":{"source":"world","loc":{"w":0,"x":3,"y":3,"z":0}}}}}"#;
        let envelope = decode_command(text).unwrap();
        assert_eq!(envelope.id, None);
        match envelope.data {
            Command::Use {
                tool_index,
                usage_index,
                ..
            } => {
                assert_eq!(tool_index, -1);
                assert_eq!(usage_index, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_decode_unit_command_and_chat_default() {
        let logout = decode_command(r#"{"data":{"type":"logout"}}"#).unwrap();
        assert_eq!(logout.data, Command::Logout);

        let chat = decode_command(r#"{"data":{"type":"chat","args":{"message":"hi"}}}"#).unwrap();
        assert_eq!(
            chat.data,
            Command::Chat {
                to: "global".to_string(),
                message: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_and_empty() {
        assert!(matches!(
            decode_command(r#"{"data":{"type":"teleportEverything","args":{}}}"#),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(decode_command("  "), Err(ProtocolError::Empty)));
        assert!(decode_command("{not json").is_err());
    }

    #[test]
    fn test_encode_event_shape() {
        let message = Envelope::new(
            None,
            ServerMessage::from(Event::SetItem {
                location: ItemLocation::world(TilePoint::new(0, 5, 6, 0)),
                item: Some(Item::new(12, 3)),
            }),
        );
        let json: serde_json::Value = serde_json::from_str(&encode_message(&message).unwrap()).unwrap();
        assert_eq!(json["data"]["type"], "setItem");
        assert_eq!(json["data"]["args"]["location"]["source"], "world");
        assert_eq!(json["data"]["args"]["item"]["type"], 12);
        assert_eq!(json["data"]["args"]["item"]["quantity"], 3);
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_encode_error_reply() {
        let message = Envelope::new(Some(3), ServerMessage::from(Reply::error("nope")));
        let text = encode_message(&message).unwrap();
        assert_eq!(text, r#"{"id":3,"data":{"error":"nope"}}"#);
    }
}
