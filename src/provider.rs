use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tracing::debug;

use crate::{
    channel::{OpenOptions, RequestChannel},
    error::{Error, Result},
};

/// Transport state shared by every channel opened through it.
pub struct TransportProvider {
    context: zmq::Context,
    open_channels: Arc<AtomicUsize>,
}

impl TransportProvider {
    pub fn new() -> Self {
        TransportProvider {
            context: zmq::Context::new(),
            open_channels: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open(&self, options: OpenOptions) -> Result<RequestChannel> {
        RequestChannel::open(self, options)
    }

    /// Channels opened and not yet closed, by the owner or a close handle.
    pub fn open_channels(&self) -> usize {
        self.open_channels.load(Ordering::Acquire)
    }

    /// Fails with [`Error::ChannelsOpen`] while channels are still open. The
    /// context itself lives on until the last socket is dropped.
    pub fn terminate(self) -> Result<()> {
        let open = self.open_channels();
        if open > 0 {
            return Err(Error::ChannelsOpen(open));
        }
        debug!("terminating transport provider");
        drop(self.context);
        Ok(())
    }

    pub(crate) fn context(&self) -> &zmq::Context {
        &self.context
    }

    pub(crate) fn channel_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.open_channels)
    }
}

impl Default for TransportProvider {
    fn default() -> Self {
        Self::new()
    }
}
