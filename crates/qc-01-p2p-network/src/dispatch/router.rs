//! Typed handler tables keyed by message type name.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::pool::Job;
use crate::domain::envelope::{decode, NetMessage};
use crate::domain::errors::DispatchError;
use crate::domain::node::ConnectionInfo;

/// Domain pool a handler runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    BlockSave,
    Broadcast,
    Chain,
    Network,
    Transaction,
    Sync,
    Save,
    /// Generic work pool
    Work,
}

impl Route {
    /// Every route, in lookup order.
    pub const ALL: [Route; 8] = [
        Route::BlockSave,
        Route::Broadcast,
        Route::Chain,
        Route::Network,
        Route::Transaction,
        Route::Sync,
        Route::Save,
        Route::Work,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Route::BlockSave => "BlockSave",
            Route::Broadcast => "Broadcast",
            Route::Chain => "Chain",
            Route::Network => "Network",
            Route::Transaction => "Transaction",
            Route::Sync => "Sync",
            Route::Save => "Save",
            Route::Work => "Work",
        }
    }
}

/// Decodes a body and binds it to its handler.
type Binder = Arc<dyn Fn(&[u8], ConnectionInfo, usize) -> Result<Job, DispatchError> + Send + Sync>;

/// Handler tables, one per route.
#[derive(Default)]
pub struct Router {
    tables: RwLock<HashMap<Route, HashMap<&'static str, Binder>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` for messages of type `M` on `route`.
    pub fn register<M, F>(&self, route: Route, handler: F) -> Result<(), DispatchError>
    where
        M: NetMessage,
        F: Fn(M, ConnectionInfo) + Send + Sync + 'static,
    {
        let mut tables = self.tables.write();
        if tables.values().any(|t| t.contains_key(M::TYPE_NAME)) {
            return Err(DispatchError::DuplicateHandler(M::TYPE_NAME.to_string()));
        }

        let handler = Arc::new(handler);
        let binder: Binder = Arc::new(move |body: &[u8], info: ConnectionInfo, limit: usize| {
            let message: M = decode(body, limit)?;
            let handler = Arc::clone(&handler);
            Ok(Box::new(move || handler(message, info)) as Job)
        });

        tables.entry(route).or_default().insert(M::TYPE_NAME, binder);
        Ok(())
    }

    /// Find the handler for `type_name`, decode `body` and return the job
    /// with the route it must run on.
    pub fn prepare(
        &self,
        type_name: &str,
        body: &[u8],
        info: ConnectionInfo,
        limit: usize,
    ) -> Result<(Route, Job), DispatchError> {
        let binder = {
            let tables = self.tables.read();
            Route::ALL.iter().find_map(|route| {
                tables
                    .get(route)
                    .and_then(|t| t.get(type_name))
                    .map(|b| (*route, Arc::clone(b)))
            })
        };

        let (route, binder) = binder.ok_or_else(|| DispatchError::NoHandler(type_name.to_string()))?;
        Ok((route, binder(body, info, limit)?))
    }

    pub fn route_of(&self, type_name: &str) -> Option<Route> {
        let tables = self.tables.read();
        Route::ALL
            .iter()
            .copied()
            .find(|route| tables.get(route).is_some_and(|t| t.contains_key(type_name)))
    }

    pub fn handler_count(&self) -> usize {
        self.tables.read().values().map(HashMap::len).sum()
    }
}
