//! Message framing and payload codecs.
//!
//! Every message is `command[12 bytes, ASCII, zero-padded] || payload`,
//! with the payload bincode-encoded and delimited only by connection close:
//! the sender writes one message and shuts down its write half, the reader
//! reads to EOF. Both peers must use the identical encoding.

use serde::{Deserialize, Serialize};

use cobre_core::constants::COMMAND_LENGTH;
use cobre_core::error::NetworkError;
use cobre_core::types::Hash256;

/// Handshake advertising a peer's protocol version and best height.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct VersionPayload {
    pub version: u32,
    pub best_height: u64,
    pub addr_from: String,
}

/// A list of known peer endpoints.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct AddrPayload {
    pub addr_list: Vec<String>,
}

/// Request for the full block-hash inventory.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

/// Inventory item kind.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum InvKind {
    Block,
    Tx,
}

/// Announcement of blocks or transactions a peer holds.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct InvPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Hash256>,
}

/// Request for one block or transaction by id.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Hash256,
}

/// A serialized block in transit.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockPayload {
    pub addr_from: String,
    pub block: Vec<u8>,
}

/// A serialized transaction in transit.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxPayload {
    pub addr_from: String,
    pub transaction: Vec<u8>,
}

/// A framed peer message: the command selects the payload type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Version(VersionPayload),
    Addr(AddrPayload),
    GetBlocks(GetBlocksPayload),
    Inv(InvPayload),
    GetData(GetDataPayload),
    Block(BlockPayload),
    Tx(TxPayload),
}

/// Pad an ASCII command into the fixed-width command field.
fn command_to_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    bytes[..command.len()].copy_from_slice(command.as_bytes());
    bytes
}

/// Strip zero padding from a command field.
fn bytes_to_command(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|b| **b != 0)
        .map(|b| *b as char)
        .collect()
}

fn encode_payload<P: bincode::Encode>(payload: &P) -> Result<Vec<u8>, NetworkError> {
    bincode::encode_to_vec(payload, bincode::config::standard())
        .map_err(|e| NetworkError::Encode(e.to_string()))
}

fn decode_payload<P: bincode::Decode<()>>(bytes: &[u8]) -> Result<P, NetworkError> {
    let (payload, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| NetworkError::Decode(e.to_string()))?;
    Ok(payload)
}

impl Message {
    /// The wire command naming this message's payload type.
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Addr(_) => "addr",
            Message::GetBlocks(_) => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
        }
    }

    /// Encode as `command[12] || bincode(payload)`.
    pub fn encode(&self) -> Result<Vec<u8>, NetworkError> {
        let payload = match self {
            Message::Version(p) => encode_payload(p)?,
            Message::Addr(p) => encode_payload(p)?,
            Message::GetBlocks(p) => encode_payload(p)?,
            Message::Inv(p) => encode_payload(p)?,
            Message::GetData(p) => encode_payload(p)?,
            Message::Block(p) => encode_payload(p)?,
            Message::Tx(p) => encode_payload(p)?,
        };

        let mut frame = Vec::with_capacity(COMMAND_LENGTH + payload.len());
        frame.extend_from_slice(&command_to_bytes(self.command()));
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode a complete frame read from a connection.
    pub fn decode(frame: &[u8]) -> Result<Self, NetworkError> {
        if frame.len() < COMMAND_LENGTH {
            return Err(NetworkError::FrameTooShort(frame.len()));
        }
        let command = bytes_to_command(&frame[..COMMAND_LENGTH]);
        let payload = &frame[COMMAND_LENGTH..];

        match command.as_str() {
            "version" => Ok(Message::Version(decode_payload(payload)?)),
            "addr" => Ok(Message::Addr(decode_payload(payload)?)),
            "getblocks" => Ok(Message::GetBlocks(decode_payload(payload)?)),
            "inv" => Ok(Message::Inv(decode_payload(payload)?)),
            "getdata" => Ok(Message::GetData(decode_payload(payload)?)),
            "block" => Ok(Message::Block(decode_payload(payload)?)),
            "tx" => Ok(Message::Tx(decode_payload(payload)?)),
            _ => Err(NetworkError::UnknownCommand(command)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: Message) {
        let frame = message.encode().unwrap();
        assert_eq!(Message::decode(&frame).unwrap(), message);
    }

    #[test]
    fn command_field_is_zero_padded() {
        let bytes = command_to_bytes("tx");
        assert_eq!(&bytes[..2], b"tx");
        assert!(bytes[2..].iter().all(|b| *b == 0));
        assert_eq!(bytes_to_command(&bytes), "tx");
    }

    #[test]
    fn version_round_trip() {
        round_trip(Message::Version(VersionPayload {
            version: 1,
            best_height: 42,
            addr_from: "localhost:3001".into(),
        }));
    }

    #[test]
    fn addr_round_trip() {
        round_trip(Message::Addr(AddrPayload {
            addr_list: vec!["localhost:3000".into(), "localhost:3001".into()],
        }));
    }

    #[test]
    fn getblocks_round_trip() {
        round_trip(Message::GetBlocks(GetBlocksPayload {
            addr_from: "localhost:3000".into(),
        }));
    }

    #[test]
    fn inv_round_trip_both_kinds() {
        round_trip(Message::Inv(InvPayload {
            addr_from: "localhost:3000".into(),
            kind: InvKind::Block,
            items: vec![Hash256([1; 32]), Hash256([2; 32])],
        }));
        round_trip(Message::Inv(InvPayload {
            addr_from: "localhost:3000".into(),
            kind: InvKind::Tx,
            items: vec![Hash256([3; 32])],
        }));
    }

    #[test]
    fn getdata_round_trip() {
        round_trip(Message::GetData(GetDataPayload {
            addr_from: "localhost:3001".into(),
            kind: InvKind::Tx,
            id: Hash256([9; 32]),
        }));
    }

    #[test]
    fn block_and_tx_round_trip() {
        round_trip(Message::Block(BlockPayload {
            addr_from: "localhost:3000".into(),
            block: vec![1, 2, 3],
        }));
        round_trip(Message::Tx(TxPayload {
            addr_from: "localhost:3001".into(),
            transaction: vec![4, 5, 6],
        }));
    }

    #[test]
    fn frame_starts_with_command() {
        let frame = Message::GetBlocks(GetBlocksPayload {
            addr_from: "x".into(),
        })
        .encode()
        .unwrap();
        assert_eq!(&frame[..9], b"getblocks");
        assert_eq!(frame[9..COMMAND_LENGTH], [0, 0, 0]);
    }

    #[test]
    fn short_frame_rejected() {
        assert!(matches!(
            Message::decode(&[0u8; 5]),
            Err(NetworkError::FrameTooShort(5))
        ));
    }

    #[test]
    fn unknown_command_rejected() {
        let mut frame = vec![0u8; COMMAND_LENGTH];
        frame[..7].copy_from_slice(b"unknown");
        assert!(matches!(
            Message::decode(&frame),
            Err(NetworkError::UnknownCommand(c)) if c == "unknown"
        ));
    }

    #[test]
    fn truncated_payload_rejected() {
        let frame = Message::Version(VersionPayload {
            version: 1,
            best_height: 7,
            addr_from: "localhost:3000".into(),
        })
        .encode()
        .unwrap();
        assert!(matches!(
            Message::decode(&frame[..frame.len() - 1]),
            Err(NetworkError::Decode(_))
        ));
    }
}
