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

//! Channel built on top of the async-std channel with the addition of the
//! consumer responding with a message to the producer. Since the producer no
//! longer only produces and the consumer no longer only consumes, the
//! producer is named [RequestSender] and the consumer [RequestReceiver].

use async_std::{
    channel::{self as async_channel, Receiver as AsyncReceiver, Sender as AsyncSender},
    future, task,
};
use std::{fmt::Display, pin::Pin, time::Duration};

/// Upper bound to outstanding channel elements.
const CHANNEL_BOUND: usize = 1000;

/// Errors which can be triggered by a channel.
#[derive(Debug, PartialEq)]
pub enum ChannelError {
    /// Error during send. Broken channel.
    SendError,
    /// Error during receive. Broken channel.
    RecvError,
    /// Timeout during receive.
    RecvTimeout,
}

impl std::error::Error for ChannelError {}

impl Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ChannelError::SendError => "channel send error",
            ChannelError::RecvError => "channel recv error",
            ChannelError::RecvTimeout => "channel recv timeout",
        };
        write!(f, "{}", msg)
    }
}

/// Creates a simple mpmc channel.
pub fn simple_channel<T>() -> (Sender<T>, Receiver<T>) {
    let (sender, receiver) = async_channel::bounded::<T>(CHANNEL_BOUND);
    (Sender(sender), Receiver(receiver))
}

/// Channel sender side.
#[derive(Clone)]
pub struct Sender<T>(AsyncSender<T>);

impl<Res> Sender<Res> {
    /// Send a message to the receiving side.
    pub async fn send(&self, response: Res) -> Result<(), ChannelError> {
        self.0
            .send(response)
            .await
            .map_err(|_| ChannelError::SendError)
    }

    /// Send a message, synchronous wrapper.
    pub fn send_sync(&self, response: Res) -> Result<(), ChannelError> {
        task::block_on(self.send(response))
    }

    /// Returns true if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Channel receiver side.
#[derive(Clone)]
pub struct Receiver<Res>(AsyncReceiver<Res>);

impl<Res> Receiver<Res> {
    /// Collect the next message.
    ///
    /// This call is blocking.
    pub async fn recv(&self) -> Result<Res, ChannelError> {
        self.0.recv().await.map_err(|_| ChannelError::RecvError)
    }

    /// Collect the next message, giving up after `timeout`.
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<Res, ChannelError> {
        match future::timeout(timeout, self.0.recv()).await {
            Ok(res) => res.map_err(|_| ChannelError::RecvError),
            Err(_) => Err(ChannelError::RecvTimeout),
        }
    }

    /// Collect the next message, synchronous wrapper.
    pub fn recv_sync(&self) -> Result<Res, ChannelError> {
        task::block_on(self.recv())
    }

    /// Collect the next message with timeout, synchronous wrapper.
    pub fn recv_timeout_sync(&self, timeout: Duration) -> Result<Res, ChannelError> {
        task::block_on(self.recv_timeout(timeout))
    }

    /// Closes the channel.
    /// The remaining messages can still be received.
    pub fn close(&self) -> bool {
        self.0.close()
    }
}

/// Create a [RequestSender] and a [RequestReceiver] with a channel between
/// them. The [RequestSender] can be cloned to submit requests to the same
/// [RequestReceiver] from multiple threads.
pub fn confirmed_channel<Req, Res>() -> (RequestSender<Req, Res>, RequestReceiver<Req, Res>) {
    let (request_sender, request_receiver) =
        async_channel::bounded::<(Req, Sender<Res>)>(CHANNEL_BOUND);
    (
        RequestSender(request_sender),
        RequestReceiver(request_receiver),
    )
}

/// [RequestSender] submits requests to a [RequestReceiver] and hands back a
/// [Receiver] from which the response is collected.
#[derive(Clone)]
pub struct RequestSender<Req, Res>(AsyncSender<(Req, Sender<Res>)>);

impl<Req, Res> RequestSender<Req, Res> {
    /// Send a request to the connected [RequestReceiver].
    /// Returns the [Receiver] used to collect the response.
    pub async fn send(&self, request: Req) -> Result<Receiver<Res>, ChannelError> {
        let (response_sender, response_receiver) = simple_channel();
        self.0
            .send((request, response_sender))
            .await
            .map_err(|_| ChannelError::SendError)
            .map(|_| response_receiver)
    }

    /// Send a request, synchronous wrapper.
    pub fn send_sync(&self, request: Req) -> Result<Receiver<Res>, ChannelError> {
        task::block_on(self.send(request))
    }

    /// Returns true if the channel is closed.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// [RequestReceiver] listens for requests. Requests are a tuple of a message
/// and a [Sender] used to respond back to the caller.
#[derive(Clone)]
pub struct RequestReceiver<Req, Res>(AsyncReceiver<(Req, Sender<Res>)>);

impl<Req, Res> RequestReceiver<Req, Res> {
    /// Collect the next request together with its response channel.
    ///
    /// This call is blocking.
    pub async fn recv(&self) -> Result<(Req, Sender<Res>), ChannelError> {
        self.0.recv().await.map_err(|_| ChannelError::RecvError)
    }

    /// Collect the next request, giving up after `timeout`.
    pub async fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<(Req, Sender<Res>), ChannelError> {
        match future::timeout(timeout, self.0.recv()).await {
            Ok(res) => res.map_err(|_| ChannelError::RecvError),
            Err(_) => Err(ChannelError::RecvTimeout),
        }
    }

    /// Collect the next request, synchronous wrapper.
    pub fn recv_sync(&self) -> Result<(Req, Sender<Res>), ChannelError> {
        task::block_on(self.recv())
    }
}

/// Type alias for simple sender.
pub type ResponseSender<Res> = Sender<Res>;

/// Type alias for simple receiver.
pub type ResponseReceiver<Res> = Receiver<Res>;

/// Stream implementation for [Receiver].
impl<T> futures::Stream for Receiver<T> {
    type Item = T;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        Pin::new(&mut self.0).poll_next(cx)
    }
}

/// Stream implementation for [RequestReceiver].
impl<Req, Res> futures::Stream for RequestReceiver<Req, Res> {
    type Item = (Req, ResponseSender<Res>);

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        Pin::new(&mut self.0).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT_DURATION: Duration = Duration::from_millis(100);

    #[test]
    fn send_recv() {
        let (tx_chan, rx_chan) = simple_channel::<u32>();

        tx_chan.send_sync(3).unwrap();
        let val = rx_chan.recv_sync().unwrap();

        assert_eq!(val, 3);
    }

    #[test]
    fn recv_closed_sender() {
        let (_, rx_chan) = simple_channel::<()>();

        let err = rx_chan.recv_sync().unwrap_err();

        assert_eq!(err, ChannelError::RecvError);
    }

    #[test]
    fn recv_with_timeout() {
        let (_tx_chan, rx_chan) = simple_channel::<()>();

        let err = rx_chan.recv_timeout_sync(TIMEOUT_DURATION).unwrap_err();

        assert_eq!(err, ChannelError::RecvTimeout);
    }

    #[test]
    fn send_confirmed_request() {
        let (req_tx_chan, req_rx_chan) = confirmed_channel::<u32, u8>();

        let res_rx_chan = req_tx_chan.send_sync(3).unwrap();
        let (req, res_tx_chan) = req_rx_chan.recv_sync().unwrap();

        res_tx_chan.send_sync(9).unwrap();
        let res = res_rx_chan.recv_sync().unwrap();

        assert_eq!(req, 3);
        assert_eq!(res, 9);
    }

    #[test]
    fn send_confirmed_request_closed_receiver() {
        let (req_tx_chan, req_rx_chan) = confirmed_channel::<u32, u8>();

        let res_rx_chan = req_tx_chan.send_sync(3).unwrap();
        let (req, res_tx_chan) = req_rx_chan.recv_sync().unwrap();
        drop(res_tx_chan);

        let err = res_rx_chan.recv_sync().unwrap_err();

        assert_eq!(req, 3);
        assert_eq!(err, ChannelError::RecvError);
    }
}
