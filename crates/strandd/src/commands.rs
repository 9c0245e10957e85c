//! Request handlers for the control socket.

use std::collections::HashMap;

use tracing::{debug, info, warn};
use uuid::Uuid;

use strand_config::CopyConfig;
use strand_vfs::Vfs;
use strand_xcopy::{create, XcopyRequest, XcopyTask};

use crate::protocol::{DriveInfo, Request, Response};

/// Command handler shared by all client connections.
pub struct CommandHandler {
    vfs: Vfs,
    copy: CopyConfig,
    tasks: HashMap<Uuid, XcopyTask>,
}

impl CommandHandler {
    pub fn new(vfs: Vfs, copy: CopyConfig) -> Self {
        Self {
            vfs,
            copy,
            tasks: HashMap::new(),
        }
    }

    /// Handle one incoming request.
    pub async fn handle_request(&mut self, request: Request) -> Response {
        match request {
            Request::Handshake { client_version } => {
                info!(client_version = %client_version, "handshake");
                Response::HandshakeAck {
                    server_version: env!("CARGO_PKG_VERSION").to_string(),
                }
            }

            Request::Status => Response::StatusAck {
                drives: self.vfs.drives().len(),
                tasks: self.tasks.len(),
                nodes: self.vfs.node_count(),
            },

            Request::ListDrives => Response::Drives {
                drives: self
                    .vfs
                    .drives()
                    .into_iter()
                    .map(|(uuid, path)| DriveInfo { uuid, path })
                    .collect(),
            },

            Request::Lookup { uuid } => Response::Node {
                node: self.vfs.find_by_uuid(uuid),
            },

            Request::FindByName { name, parent } => Response::Node {
                node: self.vfs.find_by_name(&name, parent.as_deref()),
            },

            Request::Classify { uuid } => match self.vfs.node_path(uuid) {
                Ok(path) => match strand_xstat::classify_entry(&path) {
                    Ok(magic) => Response::Classified { magic },
                    Err(e) => Response::error(e),
                },
                Err(e) => Response::error(e),
            },

            Request::Scan { drive } => match self.vfs.scan_root(drive).await {
                Ok(()) => Response::Done,
                Err(e) => Response::error(e),
            },

            Request::Rename {
                uuid,
                new_name,
                policy,
            } => self.handle_rename(uuid, &new_name, policy).await,

            Request::Remove { uuid } => self.handle_remove(uuid).await,

            Request::XcopyCreate {
                kind,
                src,
                dst,
                entries,
                policies,
            } => {
                let request = XcopyRequest {
                    kind,
                    src,
                    dst,
                    entries,
                    policies,
                    dir_concurrency: self.copy.dir_concurrency,
                    file_concurrency: self.copy.file_concurrency,
                };
                match create(&self.vfs, request).await {
                    Ok(task) => {
                        let id = task.id();
                        info!(task = %id, "xcopy task created");
                        self.tasks.insert(id, task);
                        Response::TaskCreated { task: id }
                    }
                    Err(e) => Response::error(e),
                }
            }

            Request::XcopySetPolicy {
                task,
                node,
                kind,
                policy,
                recursive,
            } => match self.task(task) {
                Ok(handle) => match handle.set_policy(node, kind, policy, recursive).await {
                    Ok(()) => Response::Done,
                    Err(e) => Response::error(e),
                },
                Err(resp) => resp,
            },

            Request::XcopyUpdate { task, node, patch } => match self.task(task) {
                Ok(handle) => match handle.update(node, patch).await {
                    Ok(()) => Response::Done,
                    Err(e) => Response::error(e),
                },
                Err(resp) => resp,
            },

            Request::XcopyAbort { task } => match self.task(task) {
                Ok(handle) => match handle.abort().await {
                    Ok(()) => Response::Done,
                    Err(e) => Response::error(e),
                },
                Err(resp) => resp,
            },

            Request::XcopyView { task } => match self.task(task) {
                Ok(handle) => match handle.view().await {
                    Ok(view) => match serde_json::to_value(&view) {
                        Ok(view) => Response::TaskView { view },
                        Err(e) => Response::error(e),
                    },
                    Err(e) => Response::error(e),
                },
                Err(resp) => resp,
            },
        }
    }

    fn task(&self, id: Uuid) -> Result<&XcopyTask, Response> {
        self.tasks
            .get(&id)
            .ok_or_else(|| Response::error(format!("unknown task: {}", id)))
    }

    async fn handle_rename(
        &mut self,
        uuid: Uuid,
        new_name: &str,
        policy: Option<strand_fs::Policy>,
    ) -> Response {
        let path = match self.vfs.node_path(uuid) {
            Ok(path) => path,
            Err(e) => return Response::error(e),
        };
        let parent = self.vfs.find_by_uuid(uuid).and_then(|n| n.parent);
        match strand_fs::rename(&path, new_name, policy, true) {
            Ok(_) => {
                debug!(from = %path.display(), to = %new_name, "entry renamed");
                self.rescan_parent(parent).await;
                Response::Node {
                    node: self.vfs.find_by_uuid(uuid),
                }
            }
            Err(e) => Response::error(e),
        }
    }

    async fn handle_remove(&mut self, uuid: Uuid) -> Response {
        let path = match self.vfs.node_path(uuid) {
            Ok(path) => path,
            Err(e) => return Response::error(e),
        };
        let parent = self.vfs.find_by_uuid(uuid).and_then(|n| n.parent);
        match strand_fs::remove(&path) {
            Ok(()) => {
                self.rescan_parent(parent).await;
                Response::Done
            }
            Err(e) => Response::error(e),
        }
    }

    async fn rescan_parent(&self, parent: Option<Uuid>) {
        if let Some(parent) = parent {
            if let Err(e) = self.vfs.scan(parent).await {
                warn!(dir = %parent, error = %e, "post-operation re-scan failed");
            }
        }
    }
}
