//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use indexmap::IndexMap;
use tickrpc_msg::{ClientId, RequestClient, StreamClient};

/// Connected request and stream clients, keyed by client identity.
#[derive(Default)]
pub struct ClientRegistry {
    rpc: IndexMap<ClientId, RequestClient>,
    stream: IndexMap<ClientId, StreamClient>,
}

/// Connections released by [`ClientRegistry::remove`].
pub struct Removed {
    pub rpc: Option<RequestClient>,
    pub stream: Option<StreamClient>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request client. Returns the client back if its id is taken.
    pub fn insert_rpc(&mut self, client: RequestClient) -> Result<(), RequestClient> {
        let id = client.id();
        if self.rpc.contains_key(&id) {
            return Err(client);
        }
        self.rpc.insert(id, client);
        Ok(())
    }

    /// Track a stream client. Only one stream connection per client id.
    pub fn insert_stream(&mut self, client: StreamClient) -> Result<(), StreamClient> {
        let id = client.id();
        if self.stream.contains_key(&id) {
            return Err(client);
        }
        self.stream.insert(id, client);
        Ok(())
    }

    /// Drop both connections of a client.
    pub fn remove(&mut self, id: &ClientId) -> Removed {
        Removed {
            rpc: self.rpc.shift_remove(id),
            stream: self.stream.shift_remove(id),
        }
    }

    pub fn remove_stream(&mut self, id: &ClientId) -> Option<StreamClient> {
        self.stream.shift_remove(id)
    }

    pub fn rpc(&self, id: &ClientId) -> Option<&RequestClient> {
        self.rpc.get(id)
    }

    pub fn rpc_mut(&mut self, id: &ClientId) -> Option<&mut RequestClient> {
        self.rpc.get_mut(id)
    }

    pub fn stream_mut(&mut self, id: &ClientId) -> Option<&mut StreamClient> {
        self.stream.get_mut(id)
    }

    pub fn has_rpc(&self, id: &ClientId) -> bool {
        self.rpc.contains_key(id)
    }

    pub fn has_stream(&self, id: &ClientId) -> bool {
        self.stream.contains_key(id)
    }

    /// Whether the client's request connection is still attached.
    pub fn is_connected(&self, id: &ClientId) -> bool {
        self.rpc.get(id).is_some_and(|client| client.connected())
    }

    /// Name the client gave on connect, or an empty string.
    pub fn name(&self, id: &ClientId) -> &str {
        self.rpc.get(id).map_or("", |client| client.name())
    }

    pub fn rpc_ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.rpc.keys().copied()
    }

    pub fn rpc_count(&self) -> usize {
        self.rpc.len()
    }

    pub fn stream_count(&self) -> usize {
        self.stream.len()
    }

    /// Clients whose request connection has gone away.
    pub fn disconnected_rpc(&self) -> Vec<ClientId> {
        self.rpc
            .iter()
            .filter(|(_, client)| !client.connected())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Stream connections that have gone away while the request side lives on.
    pub fn disconnected_streams(&self) -> Vec<ClientId> {
        self.stream
            .iter()
            .filter(|(_, client)| !client.connected())
            .map(|(id, _)| *id)
            .collect()
    }
}
