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

use crate::{
    base::{Mutex, RwLock},
    blockchain::{
        chain::Chain, dispatcher::Dispatcher, message::*, pruner::Pruner, pubsub::PubSub,
        service::ChainConfig,
    },
    db::BlockStore,
};
use async_std::task::{self, Context, Poll};
use futures::future::FutureExt;
use futures::{future, prelude::*};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

pub struct ChainWorker<S: BlockStore> {
    /// Chain service configuration.
    config: Arc<ChainConfig>,
    /// Chain engine shared with the subsystems.
    chain: Chain<S>,
    /// Chain requests receiver.
    rx_chan: BlockRequestReceiver,
    /// Dispatcher subsystem, in charge of handling incoming messages.
    dispatcher: Dispatcher<S>,
    /// Pruner subsystem, in charge of the archive migration.
    pruner: Pruner<S>,
    /// Pruner running flag.
    pruning: Arc<AtomicBool>,
}

impl<S: BlockStore> ChainWorker<S> {
    pub fn new(config: ChainConfig, store: S, rx_chan: BlockRequestReceiver) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(RwLock::new(store));
        let pubsub = Arc::new(Mutex::new(PubSub::new()));

        let chain = Chain::new(store.clone());
        // If this panics, it panics early at node boot. Not a big deal.
        chain
            .init()
            .unwrap_or_else(|err| panic!("Error initializing chain: {}", err.to_string_full()));

        let dispatcher = Dispatcher::new(chain.clone(), pubsub);
        let pruner = Pruner::new(store, config.clone());
        let pruning = Arc::new(AtomicBool::new(false));

        Self {
            config,
            chain,
            rx_chan,
            dispatcher,
            pruner,
            pruning,
        }
    }

    fn try_prune(&self) {
        if self.pruning.swap(true, Ordering::Relaxed) {
            return;
        }

        let pruner = self.pruner.clone();
        let pruning = self.pruning.clone();
        task::spawn(async move {
            pruner.run();
            pruning.store(false, Ordering::Relaxed);
        });
    }

    fn handle_message(&self, req: Message, res_chan: BlockResponseSender) {
        let dispatcher = self.dispatcher.clone();
        task::spawn(async move {
            if let Some(res) = dispatcher.message_handler(req, &res_chan) {
                if let Err(_err) = res_chan.send(res).await {
                    warn!("chain response send error");
                }
            }
        });
    }

    /// Chain worker asynchronous task.
    /// This can be stopped by submitting a `Stop` message to its input channel.
    pub async fn run(&mut self) {
        let prune_timeout = self.config.prune_interval;
        let mut prune_sleep = Box::pin(task::sleep(Duration::from_secs(prune_timeout)));

        let future = future::poll_fn(move |cx: &mut Context<'_>| -> Poll<()> {
            while prune_sleep.poll_unpin(cx).is_ready() {
                self.try_prune();
                prune_sleep = Box::pin(task::sleep(Duration::from_secs(prune_timeout)));
            }

            loop {
                match self.rx_chan.poll_next_unpin(cx) {
                    Poll::Ready(Some((Message::Stop, _))) => return Poll::Ready(()),
                    Poll::Ready(Some((req, res_chan))) => self.handle_message(req, res_chan),
                    Poll::Ready(None) => return Poll::Ready(()),
                    Poll::Pending => break,
                }
            }
            Poll::Pending
        });

        future.await
    }

    /// Chain worker synchronous task.
    /// This can be stopped by submitting a `Stop` message to its input channel.
    pub fn run_sync(&mut self) {
        task::block_on(self.run());
    }

    /// Get a clone of the chain engine.
    pub fn chain(&self) -> Chain<S> {
        self.chain.clone()
    }
}
