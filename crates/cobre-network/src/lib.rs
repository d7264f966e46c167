//! # cobre-network
//! Wire protocol for Cobre peers: 12-byte command framing with bincode
//! payloads, one message per TCP connection.

pub mod protocol;
