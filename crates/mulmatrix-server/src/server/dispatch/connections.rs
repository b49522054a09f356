use crate::server::config::DispatchConfig;
use mulmatrix_core::{Error, Result, proto::worker_client::WorkerClient};
use parking_lot::Mutex;
use std::{collections::HashMap, net::SocketAddr};
use tonic::transport::{Channel, Endpoint};

/// One lazily-connected channel per worker endpoint.
///
/// A tonic [`Channel`] multiplexes concurrent calls over a single HTTP/2
/// connection and reconnects on its own, so every row routed to the same
/// worker shares it.
pub struct ConnectionCache {
    config: DispatchConfig,
    channels: Mutex<HashMap<SocketAddr, Channel>>,
}

impl ConnectionCache {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a client for `endpoint`, creating its channel on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteCall`] if `endpoint` cannot be expressed as a URI.
    pub fn client(&self, endpoint: SocketAddr) -> Result<WorkerClient<Channel>> {
        let channel = {
            let mut channels = self.channels.lock();
            match channels.get(&endpoint) {
                Some(channel) => channel.clone(),
                None => {
                    let channel = Endpoint::from_shared(format!("http://{endpoint}"))
                        .map_err(|e| Error::RemoteCall {
                            endpoint: endpoint.to_string(),
                            reason: e.to_string(),
                        })?
                        .connect_timeout(self.config.connect_timeout)
                        .tcp_nodelay(true)
                        .connect_lazy();
                    channels.insert(endpoint, channel.clone());
                    channel
                }
            }
        };

        Ok(WorkerClient::new(channel)
            .max_decoding_message_size(self.config.max_message_bytes)
            .max_encoding_message_size(self.config.max_message_bytes))
    }

    /// Drops channels to endpoints for which `keep` returns `false`.
    pub fn retain(&self, mut keep: impl FnMut(&SocketAddr) -> bool) {
        self.channels.lock().retain(|endpoint, _| keep(endpoint));
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
