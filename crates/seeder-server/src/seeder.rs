//! The seeder: configuration, listeners and lifecycle
//!
//! ```text
//! Created --start()--> Running --stop()--> Stopping --> Stopped
//!    |                                                    ^
//!    +-------------------------stop()---------------------+
//! ```
//!
//! Everything that can be checked up front (addresses, TLS material,
//! signing key, CA files) is loaded by [`Seeder::new`]. Errors that happen
//! while serving go to the channel returned by [`Seeder::take_errors`].

use crate::embedded::EmbeddedConfigGenerator;
use crate::error::{Result, SeederError};
use crate::installer::Installer;
use crate::listener::{self, ListenerKind};
use crate::registration::Registrar;
use crate::routes::{self, AppState};
use crate::tls;
use axum::Router;
use futures::future::join_all;
use seeder_artifacts::ProviderChain;
use seeder_config::{BindInfo, SeederConfig};
use std::fmt;
use std::net::{AddrParseError, Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{info, info_span, warn, Instrument};

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Created => "created",
            State::Running => "running",
            State::Stopping => "stopping",
            State::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of [`Seeder::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// This call drained the listeners; `forced` if the deadline expired
    /// and the remaining listeners were aborted
    Drained { forced: bool },
    /// Another call already stopped (or is stopping) the seeder
    AlreadyStopping,
}

/// A bound listener socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalAddr {
    pub kind: ListenerKind,
    pub addr: SocketAddr,
}

struct ListenerSpec {
    kind: ListenerKind,
    addresses: Vec<SocketAddr>,
    tls: Option<TlsAcceptor>,
}

struct Inner {
    state: State,
    tasks: Vec<JoinHandle<()>>,
    local_addrs: Vec<LocalAddr>,
}

/// Serves boot artifacts and signed configuration to provisioning devices
pub struct Seeder {
    router: Router,
    listeners: Vec<ListenerSpec>,
    inner: Mutex<Inner>,
    errors_tx: mpsc::UnboundedSender<SeederError>,
    errors_rx: StdMutex<Option<mpsc::UnboundedReceiver<SeederError>>>,
    shutdown_tx: watch::Sender<bool>,
    done_tx: watch::Sender<bool>,
}

impl Seeder {
    /// Validate the configuration and load all key material
    pub fn new(config: &SeederConfig, chain: Arc<ProviderChain>) -> Result<Self> {
        tls::ensure_crypto_provider_installed();

        let mut listeners = Vec::new();
        for (kind, bind) in [
            (ListenerKind::Insecure, &config.servers.insecure),
            (ListenerKind::Secure, &config.servers.secure),
        ] {
            if let Some(bind) = bind {
                listeners.push(listener_spec(kind, bind)?);
            }
        }
        if listeners.is_empty() {
            return Err(SeederError::Config("no listeners configured under servers".to_string()));
        }

        let settings = &config.embedded_config_generator;
        let generator = EmbeddedConfigGenerator::from_files(&settings.key_path, &settings.cert_path)?;
        let installer = Installer::from_settings(&config.installer_settings)?;
        let registrar = Registrar::from_settings(&config.registry_settings)?;

        info!(providers = ?chain.provider_names(), "Artifact providers");

        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let router = routes::router(AppState {
            chain,
            generator: Arc::new(generator),
            installer: Arc::new(installer),
            registrar: Arc::new(registrar),
            errors: errors_tx.clone(),
        });

        Ok(Self {
            router,
            listeners,
            inner: Mutex::new(Inner {
                state: State::Created,
                tasks: Vec::new(),
                local_addrs: Vec::new(),
            }),
            errors_tx,
            errors_rx: StdMutex::new(Some(errors_rx)),
            shutdown_tx: watch::channel(false).0,
            done_tx: watch::channel(false).0,
        })
    }

    /// Bind every configured address and start serving
    ///
    /// If any address fails to bind nothing is served and the seeder stays
    /// in `Created`.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != State::Created {
            return Err(SeederError::InvalidState {
                operation: "start",
                state: inner.state,
            });
        }

        let mut bound = Vec::new();
        for spec in &self.listeners {
            for addr in &spec.addresses {
                // Sockets bound so far are released when `bound` drops
                bound.push(listener::bind(spec.kind, *addr, spec.tls.clone()).await?);
            }
        }

        for listener in bound {
            inner.local_addrs.push(LocalAddr {
                kind: listener.kind,
                addr: listener.addr,
            });
            let span = info_span!("listener", kind = %listener.kind, addr = %listener.addr);
            inner.tasks.push(tokio::spawn(
                listener::serve(
                    listener,
                    self.router.clone(),
                    self.shutdown_tx.subscribe(),
                    self.errors_tx.clone(),
                )
                .instrument(span),
            ));
        }

        inner.state = State::Running;
        info!(listeners = inner.tasks.len(), "Seeder running");
        Ok(())
    }

    /// Stop accepting, drain open connections and wait up to `deadline`
    ///
    /// Listeners still running at the deadline are aborted together with
    /// their connections.
    pub async fn stop(&self, deadline: Duration) -> StopOutcome {
        let tasks = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                State::Stopping | State::Stopped => return StopOutcome::AlreadyStopping,
                State::Created => {
                    inner.state = State::Stopped;
                    self.done_tx.send_replace(true);
                    info!("Seeder stopped before it was started");
                    return StopOutcome::Drained { forced: false };
                }
                State::Running => {
                    inner.state = State::Stopping;
                    std::mem::take(&mut inner.tasks)
                }
            }
        };

        info!(listeners = tasks.len(), ?deadline, "Stopping seeder");
        self.shutdown_tx.send_replace(true);

        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        let forced = match tokio::time::timeout(deadline, join_all(tasks)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = %e, "Listener task ended abnormally");
                    }
                }
                false
            }
            Err(_) => {
                warn!(?deadline, "Shutdown deadline expired, aborting listeners");
                for abort in aborts {
                    abort.abort();
                }
                true
            }
        };

        self.inner.lock().await.state = State::Stopped;
        self.done_tx.send_replace(true);
        info!(forced, "Seeder stopped");
        StopOutcome::Drained { forced }
    }

    pub async fn state(&self) -> State {
        self.inner.lock().await.state
    }

    /// Bound sockets, in configuration order (empty before `start`)
    pub async fn local_addrs(&self) -> Vec<LocalAddr> {
        self.inner.lock().await.local_addrs.clone()
    }

    /// The operational error stream; only the first call gets it
    pub fn take_errors(&self) -> Option<mpsc::UnboundedReceiver<SeederError>> {
        self.errors_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Wait until the seeder reaches `Stopped`
    pub async fn done(&self) {
        let mut done = self.done_tx.subscribe();
        let _ = done.wait_for(|done| *done).await;
    }

    pub fn is_done(&self) -> bool {
        *self.done_tx.borrow()
    }
}

impl fmt::Debug for Seeder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seeder")
            .field("listeners", &self.listeners.len())
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

fn listener_spec(kind: ListenerKind, bind: &BindInfo) -> Result<ListenerSpec> {
    if bind.address.is_empty() {
        return Err(SeederError::InvalidBindAddress {
            address: String::new(),
            reason: format!("{kind} listener has no addresses"),
        });
    }

    let addresses = bind
        .address
        .iter()
        .map(|raw| parse_bind_address(raw))
        .collect::<Result<Vec<_>>>()?;

    let tls = tls::acceptor(bind)?;
    if tls.is_none() && kind == ListenerKind::Secure {
        warn!("Secure listener has no TLS material and will serve plain HTTP");
    }

    Ok(ListenerSpec { kind, addresses, tls })
}

/// `ip:port`, or `[ipv6%zone]:port` where the zone is an interface name
/// or a numeric scope id
fn parse_bind_address(raw: &str) -> Result<SocketAddr> {
    let invalid = |reason: String| SeederError::InvalidBindAddress {
        address: raw.to_string(),
        reason,
    };

    let trimmed = raw.trim();
    let parse_error = match trimmed.parse::<SocketAddr>() {
        Ok(addr) => return Ok(addr),
        Err(e) => e.to_string(),
    };

    let Some((host, port)) = trimmed.strip_prefix('[').and_then(|rest| rest.split_once("]:")) else {
        return Err(invalid(parse_error));
    };
    let Some((ip, zone)) = host.split_once('%') else {
        return Err(invalid(parse_error));
    };

    let ip: Ipv6Addr = ip.parse().map_err(|e: AddrParseError| invalid(e.to_string()))?;
    let port: u16 = port.parse().map_err(|_| invalid(format!("invalid port {port:?}")))?;
    let scope_id = interface_index(zone).map_err(invalid)?;
    Ok(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, scope_id)))
}

#[cfg(unix)]
fn interface_index(name: &str) -> std::result::Result<u32, String> {
    nix::net::if_::if_nametoindex(name).map_err(|e| format!("unknown interface {name:?}: {e}"))
}

#[cfg(not(unix))]
fn interface_index(name: &str) -> std::result::Result<u32, String> {
    Err(format!("interface zone {name:?} needs a numeric scope id on this platform"))
}
