//! Watch mode is implemented as a three-part system:
//!
//! 1. **File watcher**: Uses the `notify` crate to monitor filesystem
//!    events recursively. Events are debounced, so a burst of saves arrives
//!    as a single batch.
//! 2. **WebSocket server**: Spawns a dedicated thread using `tungstenite`
//!    to maintain persistent connections with open browser tabs.
//! 3. **Client script**: The HTML task injects the snippet returned by
//!    [`BuildContext::refresh_script`] through the `@@liveReload`
//!    placeholder. It connects to the WebSocket server and listens for a
//!    `"reload"` message.
//!
//! ## The Loop
//!
//! Every batch of changed paths is matched against the static watch table.
//! The steps of all matching rules are run one after another, each at most
//! once per batch. When at least one of them succeeded, the reload command
//! is broadcast to every connected client.

use std::collections::HashSet;
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use glob::Pattern;
use notify::RecursiveMode;
use notify_debouncer_full::new_debouncer;
use tungstenite::WebSocket;

use crate::BuildContext;
use crate::engine::{Orchestrator, Step};
use crate::error::WatchError;

/// Entry of the watch table: a change to anything matching `patterns`
/// reruns `step`.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub patterns: Vec<String>,
    pub step: Step,
}

impl WatchRule {
    pub fn new<S: Into<String>>(patterns: impl IntoIterator<Item = S>, step: impl Into<Step>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            step: step.into(),
        }
    }
}

/// Runs `initial`, then reruns the matching rules of the watch table on every
/// batch of file changes until the event channel closes.
pub(crate) fn watch(
    orch: &Orchestrator,
    mut ctx: BuildContext,
    initial: &Step,
    rules: &[WatchRule],
) -> Result<(), WatchError> {
    let (tcp, port) = reserve_port(ctx.config.site.server.reload_port)?;
    ctx.reload_port = Some(port);

    tracing::info!("running initial build...");
    if let Err(e) = orch.run(&ctx, initial) {
        tracing::error!("initial build failed, watching anyway:\n{e}");
    }

    tracing::info!("initial build completed, now watching for changes...");
    let clients = Arc::new(Mutex::new(vec![]));

    let _thread_i = new_thread_ws_incoming(tcp, clients.clone());
    let (tx_reload, _thread_o) = new_thread_ws_reload(clients.clone());

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, tx)?;

    let mut watched = HashSet::new();
    let mut filters = Vec::with_capacity(rules.len());
    for rule in rules {
        let mut patterns = Vec::new();
        for glob in &rule.patterns {
            match resolve_watch_path(ctx.config.resolve(glob)) {
                Ok((path, pattern)) => {
                    watched.insert(path);
                    patterns.push(pattern);
                }
                Err(e) => tracing::warn!("not watching '{glob}': {e}"),
            }
        }
        filters.push(patterns);
    }

    // Collapse watched paths to reduce the number of watches
    let watched = collapse_watch_paths(watched);

    for path in watched {
        tracing::info!("watching {}", path);
        debouncer.watch(path, RecursiveMode::Recursive)?;
    }

    #[cfg(feature = "server")]
    let _thread_http = super::http::start(
        ctx.config.resolve(&ctx.config.paths.build.server),
        ctx.config.site.server.port,
    );

    loop {
        match rx.recv()? {
            Ok(events) => {
                let paths: Vec<_> = events
                    .iter()
                    .flat_map(|de| de.event.paths.iter())
                    .map(|path| path.as_path())
                    .collect();

                let dirty = dirty_rules(&filters, &paths);
                if dirty.is_empty() {
                    continue;
                }

                tracing::info!("change detected, re-running {} step(s)...", dirty.len());

                let mut succeeded = false;
                for index in dirty {
                    match orch.run(&ctx, &rules[index].step) {
                        Ok(_) => succeeded = true,
                        Err(e) => tracing::error!("Error running tasks:\n{e}"),
                    }
                }

                if succeeded && tx_reload.send(()).is_err() {
                    tracing::warn!("live reload thread is gone");
                }
                tracing::info!("rebuild complete, watching for changes...");
            }
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e:?}");
                }
            }
        }
    }
}

/// Indices of the rules with a pattern matching any of `paths`, in table
/// order, each at most once.
fn dirty_rules(filters: &[Vec<Pattern>], paths: &[&Path]) -> Vec<usize> {
    filters
        .iter()
        .enumerate()
        .filter(|(_, patterns)| {
            paths
                .iter()
                .any(|path| patterns.iter().any(|pattern| pattern.matches_path(path)))
        })
        .map(|(index, _)| index)
        .collect()
}

fn reserve_port(preferred: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let addr = listener.local_addr()?;
    let port = addr.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(
    server: TcpListener,
    client: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let Ok(stream) = stream else {
                continue;
            };

            let socket = match tungstenite::accept(stream) {
                Ok(socket) => socket,
                Err(e) => {
                    tracing::warn!("rejected live reload client: {e}");
                    continue;
                }
            };

            client.lock().unwrap_or_else(|e| e.into_inner()).push(socket);
        }
    })
}

fn new_thread_ws_reload(
    client: Arc<Mutex<Vec<WebSocket<TcpStream>>>>,
) -> (Sender<()>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();

    let thread = std::thread::spawn(move || {
        while rx.recv().is_ok() {
            let mut clients = client.lock().unwrap_or_else(|e| e.into_inner());
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send("reload".into()) {
                    Ok(_) => {}
                    Err(tungstenite::error::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last 10 connections
            let len = clients.len();
            if len > 10 {
                for mut socket in clients.drain(0..len - 10) {
                    socket.close(None).ok();
                }
            }
        }
    });

    (tx, thread)
}

/// Splits a glob string into a canonicalized static root path (for
/// watching) and a compiled absolute Pattern (for matching).
pub fn resolve_watch_path(glob_str: impl AsRef<str>) -> anyhow::Result<(Utf8PathBuf, Pattern)> {
    let path = Utf8Path::new(glob_str.as_ref());

    // Split path into static root and dynamic suffix (containing wildcards)
    let components: Vec<_> = path.components().collect();
    let split_idx = components
        .iter()
        .position(|c| c.as_str().contains(['*', '?', '[']))
        .unwrap_or(components.len());

    let root_part: Utf8PathBuf = components.iter().take(split_idx).collect();
    let suffix_part: Utf8PathBuf = components.iter().skip(split_idx).collect();

    // Canonicalize the static root (must exist on disk)
    let absolute_root = root_part.canonicalize_utf8()?;

    // A concrete file is matched exactly, but its parent is watched so
    // atomic writes are caught.
    let (watch_root, match_pattern_str) =
        if suffix_part.as_str().is_empty() && absolute_root.is_file() {
            let parent = absolute_root
                .parent()
                .unwrap_or(&absolute_root)
                .to_path_buf();
            (parent, absolute_root)
        } else {
            let pattern_str = absolute_root.join(&suffix_part);
            (absolute_root, pattern_str)
        };

    let pattern = Pattern::new(&match suffix_part.as_str() {
        "" => Pattern::escape(match_pattern_str.as_str()),
        suffix => format!("{}/{suffix}", Pattern::escape(watch_root.as_str())),
    })?;

    Ok((watch_root, pattern))
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive. This function sorts the paths and filters
/// out any path that is a subdirectory of a previously accepted path.
fn collapse_watch_paths(paths: HashSet<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<_> = paths.into_iter().collect();
    paths.sort();

    let mut filtered = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}
