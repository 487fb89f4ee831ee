// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The instance aggregate: every subsystem plus the collaborator trait
//! objects, passed by reference instead of living in module globals.
//! Tests swap any collaborator for a double through the builder.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::account::{AccountAuthority, AccountGate, AuthorityClient};
use crate::bootstrap;
use crate::config::Config;
use crate::gossip::Gossip;
use crate::health::HealthMonitor;
use crate::identity::Identity;
use crate::map::Map;
use crate::netenv::{LocalNetworkEnv, NetworkEnv};
use crate::notify::Notifier;
use crate::ship::{DefaultShipFactory, ShipFactory};
use crate::sluice::{Sluice, SluiceConfig};
use crate::status::{Event, StatusFeed};
use crate::storage::{keys, MemoryStore, Storage};
use crate::terminal::{PipeTerminalLayer, TerminalLayer};

/// How often expired hubs are pruned from the map.
const PRUNE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(600);

/// One running client: state plus collaborators.
pub struct Instance {
    pub config: Config,
    /// The active home hub policy; starts as the configured rule list
    /// and can be swapped at runtime.
    policy: parking_lot::RwLock<crate::policy::Policy>,
    pub identity: Identity,
    pub map: Arc<Map>,
    pub storage: Arc<dyn Storage>,
    pub status: Arc<StatusFeed>,
    pub notifier: Arc<Notifier>,
    pub gate: Arc<AccountGate>,
    pub gossip: Arc<Gossip>,
    pub netenv: Arc<dyn NetworkEnv>,
    pub ships: Arc<dyn ShipFactory>,
    pub terminals: Arc<dyn TerminalLayer>,
    pub health: Arc<HealthMonitor>,
    pub shutdown: CancellationToken,
}

/// Collaborator injection for [`Instance`].
pub struct InstanceBuilder {
    config: Config,
    storage: Option<Arc<dyn Storage>>,
    authority: Option<Arc<dyn AccountAuthority>>,
    netenv: Option<Arc<dyn NetworkEnv>>,
    ships: Option<Arc<dyn ShipFactory>>,
    terminals: Option<Arc<dyn TerminalLayer>>,
    shutdown: Option<CancellationToken>,
}

impl InstanceBuilder {
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn authority(mut self, authority: Arc<dyn AccountAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn netenv(mut self, netenv: Arc<dyn NetworkEnv>) -> Self {
        self.netenv = Some(netenv);
        self
    }

    pub fn ships(mut self, ships: Arc<dyn ShipFactory>) -> Self {
        self.ships = Some(ships);
        self
    }

    pub fn terminals(mut self, terminals: Arc<dyn TerminalLayer>) -> Self {
        self.terminals = Some(terminals);
        self
    }

    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Assemble the instance: storage, identity (fatal when the stored
    /// record is malformed), map replay, and defaults for everything not
    /// injected.
    pub async fn build(self) -> anyhow::Result<Arc<Instance>> {
        let config = self.config;

        let storage: Arc<dyn Storage> = match self.storage {
            Some(storage) => storage,
            None => match &config.state_file {
                Some(path) => Arc::new(MemoryStore::with_file(path)?),
                None => Arc::new(MemoryStore::new()),
            },
        };

        let identity = Identity::load_or_create(storage.as_ref()).await?;
        let status = Arc::new(StatusFeed::new());
        migrate_legacy_records(storage.as_ref(), &config.map_name, &status).await?;

        let map = Arc::new(Map::new(config.map_name.clone()));
        let gossip = Arc::new(Gossip::new(
            Arc::clone(&map),
            Arc::clone(&storage),
            config.trusted_owner_set(),
        ));
        let replayed = gossip.load_from_storage().await?;
        if replayed > 0 {
            debug!(replayed, "map cache replayed from storage");
        }

        let authority: Arc<dyn AccountAuthority> = match self.authority {
            Some(authority) => authority,
            None => Arc::new(AuthorityClient::new(
                config.authority_url.clone().unwrap_or_default(),
                config.authority_token.clone(),
            )),
        };

        let instance = Arc::new(Instance {
            policy: parking_lot::RwLock::new(config.policy().unwrap_or_default()),
            identity,
            map,
            gossip,
            gate: Arc::new(AccountGate::new(authority)),
            status,
            notifier: Arc::new(Notifier::new()),
            netenv: self.netenv.unwrap_or_else(|| Arc::new(LocalNetworkEnv::new())),
            ships: self.ships.unwrap_or_else(|| Arc::new(DefaultShipFactory)),
            terminals: self
                .terminals
                .unwrap_or_else(|| Arc::new(PipeTerminalLayer { device: config.device_name.clone() })),
            health: Arc::new(HealthMonitor::new()),
            shutdown: self.shutdown.unwrap_or_default(),
            storage,
            config,
        });
        Ok(instance)
    }
}

/// Move hub records from the pre-named-maps layout into the current one.
/// Snapshots written by older builds used `core:spn/hubs/`.
async fn migrate_legacy_records(
    storage: &dyn Storage,
    map_name: &str,
    status: &StatusFeed,
) -> anyhow::Result<()> {
    const LEGACY_PREFIX: &str = "core:spn/hubs/";
    for (key, value) in storage.query(LEGACY_PREFIX).await? {
        let Some(hub) = key.strip_prefix(LEGACY_PREFIX) else { continue };
        let new_key = keys::map_hub(map_name, hub);
        storage.put(&new_key, value).await?;
        storage.delete(&key).await?;
        status.emit(Event::Migrated { from: key.clone(), to: new_key });
        info!(key, "migrated legacy hub record");
    }
    Ok(())
}

impl Instance {
    pub fn builder(config: Config) -> InstanceBuilder {
        InstanceBuilder {
            config,
            storage: None,
            authority: None,
            netenv: None,
            ships: None,
            terminals: None,
            shutdown: None,
        }
    }

    /// The active home hub policy.
    pub fn policy(&self) -> crate::policy::Policy {
        self.policy.read().clone()
    }

    /// Swap the home hub policy and wake the session manager so a
    /// policy-blocked client retries immediately.
    pub fn set_policy(&self, policy: crate::policy::Policy) {
        *self.policy.write() = policy;
        self.status.emit(Event::ConfigChanged { key: "home-policy".into() });
        self.health.trigger();
    }

    /// Seed the map from the configured bootstrap inputs. Returns how
    /// many entries were inserted.
    pub async fn bootstrap_map(&self) -> anyhow::Result<usize> {
        let trusted = self.config.trusted_owner_set();
        let mut entries = Vec::new();
        if let Some(ref uri) = self.config.bootstrap_hub {
            entries.push(bootstrap::parse_bootstrap_uri(uri)?);
        }
        if let Some(ref path) = self.config.bootstrap_file {
            entries.extend(bootstrap::load_file(path).await?);
        }
        let inserted = bootstrap::apply(&self.map, entries, &trusted);
        if inserted > 0 {
            info!(inserted, "bootstrap entries applied");
        }
        Ok(inserted)
    }

    /// Spawn the long-lived tasks: the session manager, the sluice, the
    /// status persister, and the map prune sweep.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<Arc<Sluice>> {
        let sluice_config = SluiceConfig { port: self.config.sluice_port, ..SluiceConfig::default() };
        let sluice = Sluice::spawn(
            sluice_config,
            Arc::clone(&self.netenv),
            self.shutdown.child_token(),
        )
        .await?;

        tokio::spawn(crate::session::run(Arc::clone(self)));
        tokio::spawn(Arc::clone(self).persist_status());
        tokio::spawn(Arc::clone(self).prune_sweep());
        Ok(sluice)
    }

    /// Mirror every status change into storage for read-only consumers.
    async fn persist_status(self: Arc<Self>) {
        let mut rx = self.status.watch();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            let snapshot = rx.borrow_and_update().clone();
            let value = match serde_json::to_value(&snapshot) {
                Ok(value) => value,
                Err(e) => {
                    warn!(err = %e, "status serialization failed");
                    continue;
                }
            };
            if let Err(e) = self.storage.put(keys::STATUS, value).await {
                warn!(err = %e, "status persistence failed");
            }
        }
    }

    /// Periodically drop expired hubs and their stored records.
    async fn prune_sweep(self: Arc<Self>) {
        let mut timer = tokio::time::interval(PRUNE_INTERVAL);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            let removed = self.map.prune();
            for hub in removed {
                let key = keys::map_hub(self.map.name(), hub.as_str());
                if self.storage.delete(&key).await.is_ok() {
                    self.status.emit(Event::Deleted { key });
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
