use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use tracing::{debug, warn};

use crate::api::ApiService;

use super::error::ApiError;
use super::models::{CommentNode, CommentPayload};

/// Upper bound on reply fetches in flight per thread load. A deep or wide
/// thread proceeds level by level through a worklist instead of recursing,
/// so neither the call stack nor the connection pool can be exhausted.
pub const MAX_CONCURRENT_REPLY_FETCHES: usize = 8;

/// Builds an immutable thread snapshot — the root comment plus its fully
/// materialized reply tree — from the flat per-parent reply endpoint.
pub struct ThreadLoader {
    api: Arc<ApiService>,
}

impl ThreadLoader {
    pub fn new(api: Arc<ApiService>) -> Self {
        Self { api }
    }

    /// One level of replies, normalized. Used internally per worklist entry
    /// and exposed for incremental expansion.
    pub async fn load_replies(&self, comment_id: &str) -> Result<Vec<CommentNode>, ApiError> {
        let payloads = self.api.fetch_replies(comment_id).await?;
        Ok(payloads.into_iter().map(CommentPayload::normalize).collect())
    }

    /// Fetch the root and every transitive reply.
    ///
    /// Root failure fails the whole load; a failed reply fetch only empties
    /// that subtree, so one flaky branch cannot take down the thread.
    /// Sibling order in the result is exactly the server-returned order at
    /// each level, no matter in which order the fetches complete.
    pub async fn load_thread(&self, comment_id: &str) -> Result<CommentNode, ApiError> {
        let mut root = self.api.fetch_comment(comment_id).await?.normalize();
        let root_id = root.id.clone();

        // Worklist BFS: `nodes` holds every discovered reply, `children`
        // the ordered child ids per parent, `discovery` the parents in the
        // order their reply lists were recorded.
        let mut nodes: HashMap<String, CommentNode> = HashMap::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut discovery: Vec<String> = Vec::new();
        let mut frontier: Vec<String> = vec![root_id.clone()];

        while !frontier.is_empty() {
            let fetches = frontier.drain(..).map(|parent_id| {
                let api = Arc::clone(&self.api);
                async move {
                    match api.fetch_replies(&parent_id).await {
                        Ok(payloads) => {
                            let replies: Vec<CommentNode> = payloads
                                .into_iter()
                                .map(CommentPayload::normalize)
                                .collect();
                            (parent_id, replies)
                        }
                        Err(err) => {
                            warn!(parent = %parent_id, error = %err, "reply fetch failed, treating subtree as empty");
                            (parent_id, Vec::new())
                        }
                    }
                }
            });
            let results: Vec<(String, Vec<CommentNode>)> = stream::iter(fetches)
                .buffer_unordered(MAX_CONCURRENT_REPLY_FETCHES)
                .collect()
                .await;

            let mut next = Vec::new();
            for (parent_id, replies) in results {
                let mut ordered_ids = Vec::with_capacity(replies.len());
                for reply in replies {
                    // Id-keyed merge: a node already in the tree is never
                    // attached a second time.
                    if reply.id == root_id || nodes.contains_key(&reply.id) {
                        debug!(id = %reply.id, "skipping duplicate node in reply listing");
                        continue;
                    }
                    ordered_ids.push(reply.id.clone());
                    next.push(reply.id.clone());
                    nodes.insert(reply.id.clone(), reply);
                }
                children.insert(parent_id.clone(), ordered_ids);
                discovery.push(parent_id);
            }
            frontier = next;
        }

        // Attach bottom-up: walking the discovery order backwards guarantees
        // every parent's descendants are fully assembled before the parent
        // collects them, and the per-parent id lists restore sibling order.
        for parent_id in discovery.iter().rev() {
            let child_ids = children.remove(parent_id).unwrap_or_default();
            let replies: Vec<CommentNode> = child_ids
                .iter()
                .filter_map(|id| nodes.remove(id))
                .collect();
            if parent_id == &root_id {
                root.replies = replies;
            } else if let Some(parent) = nodes.get_mut(parent_id) {
                parent.replies = replies;
            }
        }

        Ok(root)
    }
}
