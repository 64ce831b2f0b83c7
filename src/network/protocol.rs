// This file is part of SENSA.
//
// Copyright (C) 2023 Affidaty Spa.
//
// SENSA is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// SENSA is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with SENSA. If not, see <https://www.gnu.org/licenses/>.

//! Wire protocol.
//!
//! Frames are a 4-byte big-endian length followed by a JSON payload. Before
//! any application frame both ends run a symmetric mutual-authentication
//! handshake: each side proves possession of an Ed25519 key enrolled in the
//! trust roster by signing the other side's nonce bound to the network
//! identifier. Connections failing the handshake are dropped before any
//! application logic runs.

use super::service::NetConfig;
use crate::{
    base::{
        schema::Block,
        serialize::{json_deserialize, json_serialize},
    },
    crypto::PublicKey,
    Error, ErrorKind, Result,
};
use async_std::net::TcpStream;
use futures::{AsyncReadExt, AsyncWriteExt};

/// Upper bound for a single frame; caps the practical chain size of a
/// `GetChain` response.
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

fn net_err<E>(err: E) -> Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Error::new_ext(ErrorKind::BadNetwork, err)
}

/// Write one length-prefixed frame.
pub async fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(Error::new_ext(ErrorKind::MalformedData, "oversized frame"));
    }
    let len = (payload.len() as u32).to_be_bytes();
    stream.write_all(&len).await.map_err(net_err)?;
    stream.write_all(payload).await.map_err(net_err)?;
    stream.flush().await.map_err(net_err)
}

/// Read one length-prefixed frame.
pub async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.map_err(net_err)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::new_ext(ErrorKind::MalformedData, "oversized frame"));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.map_err(net_err)?;
    Ok(buf)
}

/// Request of one of the three wire operations.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(tag = "op")]
pub enum RpcRequest {
    /// Full local chain request.
    GetChain,
    /// Push the immediate next block (strict sequence check).
    ReceiveBlock { block: Block },
    /// Push a block, idempotent on the index.
    AddBlock { block: Block },
}

/// Transport status taxonomy.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum StatusCode {
    /// Structural or sequence error in the request.
    InvalidArgument,
    /// Storage or service failure.
    Internal,
    /// The operation did not complete within its deadline.
    DeadlineExceeded,
}

impl StatusCode {
    /// Map an internal error to its transport status.
    pub fn from_error(err: &Error) -> StatusCode {
        use ErrorKind::*;
        match err.kind {
            InvalidPayload | InvalidBlockStructure | InvalidBlockHash | InvalidSequence
            | DuplicateIndex | HashCollision | OutOfRange | MalformedData | BadNetwork
            | InvalidSignature => StatusCode::InvalidArgument,
            RpcTimeout => StatusCode::DeadlineExceeded,
            _ => StatusCode::Internal,
        }
    }

    /// Reconstruct an internal error on the client side.
    pub fn into_error(self, message: String) -> Error {
        let kind = match self {
            StatusCode::InvalidArgument => ErrorKind::InvalidSequence,
            StatusCode::Internal => ErrorKind::Other,
            StatusCode::DeadlineExceeded => ErrorKind::RpcTimeout,
        };
        Error::new_ext(kind, message)
    }
}

/// Response to every wire operation.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(tag = "status")]
pub enum RpcResponse {
    /// Current chain of the responding node, in index order.
    Ok { chain: Vec<Block> },
    /// Operation failure.
    Err { code: StatusCode, message: String },
}

/// Handshake opening message.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Hello {
    /// Network identifier.
    pub network: String,
    /// Claimed validator identifier.
    pub validator: String,
    /// Hex Ed25519 public key.
    pub public_key: String,
    /// Hex challenge nonce.
    pub nonce: String,
    /// Address the peer accepts connections on, if it serves one.
    pub listen: Option<String>,
}

/// Handshake proof message.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Auth {
    /// Hex signature over the peer's challenge.
    pub signature: String,
}

/// Authenticated identity of the remote end.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerIdentity {
    pub validator: String,
    pub listen: Option<String>,
}

fn auth_payload(network: &str, nonce: &str) -> String {
    format!("{}|{}", network, nonce)
}

/// Run the mutual authentication handshake.
///
/// The protocol is symmetric, both the dialer and the listener run the same
/// sequence: exchange `Hello`, then exchange `Auth` proofs over the received
/// nonce. A peer is accepted only if it claims our network, its key matches
/// the roster entry for the claimed validator and its proof verifies.
pub async fn handshake(stream: &mut TcpStream, config: &NetConfig) -> Result<PeerIdentity> {
    let nonce = hex::encode(rand::random::<[u8; 16]>());
    let hello = Hello {
        network: config.network.clone(),
        validator: config.validator.clone(),
        public_key: config.keypair.public_key().to_hex(),
        nonce: nonce.clone(),
        listen: config.advertised.clone(),
    };
    write_frame(stream, &json_serialize(&hello)?).await?;

    let peer_hello: Hello = json_deserialize(&read_frame(stream).await?)?;
    if peer_hello.network != config.network {
        return Err(Error::new_ext(
            ErrorKind::BadNetwork,
            format!("peer speaks for network '{}'", peer_hello.network),
        ));
    }
    let peer_key = PublicKey::from_hex(&peer_hello.public_key)?;
    match config.roster.get(&peer_hello.validator) {
        Some(key) if *key == peer_key => (),
        _ => {
            return Err(Error::new_ext(
                ErrorKind::InvalidSignature,
                format!("validator '{}' not in the trust roster", peer_hello.validator),
            ));
        }
    }

    let proof = Auth {
        signature: config
            .keypair
            .sign_hex(&auth_payload(&config.network, &peer_hello.nonce)),
    };
    write_frame(stream, &json_serialize(&proof)?).await?;

    let peer_proof: Auth = json_deserialize(&read_frame(stream).await?)?;
    if !peer_key.verify_hex(&auth_payload(&config.network, &nonce), &peer_proof.signature) {
        return Err(Error::new_ext(
            ErrorKind::InvalidSignature,
            "handshake proof verification failure",
        ));
    }

    Ok(PeerIdentity {
        validator: peer_hello.validator,
        listen: peer_hello.listen,
    })
}
