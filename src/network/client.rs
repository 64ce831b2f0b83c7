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

//! RPC client side.
//!
//! One connection per call. Every call carries a deadline; a missed deadline
//! surfaces as `RpcTimeout` and never mutates chain state.

use super::{
    protocol::{self, RpcRequest, RpcResponse},
    service::NetConfig,
};
use crate::{
    base::{
        schema::Block,
        serialize::{json_deserialize, json_serialize},
    },
    Error, ErrorKind, Result,
};
use async_std::{future, net::TcpStream};
use std::{sync::Arc, time::Duration};

pub(crate) struct RpcClient {
    config: Arc<NetConfig>,
}

impl Clone for RpcClient {
    fn clone(&self) -> Self {
        RpcClient {
            config: self.config.clone(),
        }
    }
}

impl RpcClient {
    pub fn new(config: Arc<NetConfig>) -> Self {
        Self { config }
    }

    async fn call(
        &self,
        addr: &str,
        request: &RpcRequest,
        timeout: Duration,
    ) -> Result<Vec<Block>> {
        let exchange = async {
            let mut stream = TcpStream::connect(addr)
                .await
                .map_err(|err| Error::new_ext(ErrorKind::BadNetwork, err))?;
            protocol::handshake(&mut stream, &self.config).await?;
            protocol::write_frame(&mut stream, &json_serialize(request)?).await?;
            let buf = protocol::read_frame(&mut stream).await?;
            match json_deserialize::<RpcResponse>(&buf)? {
                RpcResponse::Ok { chain } => Ok(chain),
                RpcResponse::Err { code, message } => Err(code.into_error(message)),
            }
        };
        match future::timeout(timeout, exchange).await {
            Ok(res) => res,
            Err(_) => Err(Error::new_ext(
                ErrorKind::RpcTimeout,
                format!("deadline exceeded calling {}", addr),
            )),
        }
    }

    /// Pull the full chain of a peer.
    pub async fn get_chain(&self, addr: &str, timeout: Duration) -> Result<Vec<Block>> {
        self.call(addr, &RpcRequest::GetChain, timeout).await
    }

    /// Push a block to a peer, idempotent on the index.
    pub async fn add_block(
        &self,
        addr: &str,
        block: &Block,
        timeout: Duration,
    ) -> Result<Vec<Block>> {
        let request = RpcRequest::AddBlock {
            block: block.clone(),
        };
        self.call(addr, &request, timeout).await
    }

    /// Push the next block to a peer with the strict sequence check.
    pub async fn receive_block(
        &self,
        addr: &str,
        block: &Block,
        timeout: Duration,
    ) -> Result<Vec<Block>> {
        let request = RpcRequest::ReceiveBlock {
            block: block.clone(),
        };
        self.call(addr, &request, timeout).await
    }
}
