use tracing::debug;

use super::models::{CommentNode, FeedPayload, SortField, SortKey};
use super::push::PushEvent;

/// Lifecycle of the visible feed. `Error` keeps the previous page on screen
/// (stale-but-visible) instead of blanking it.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FeedPhase {
    #[default]
    Idle,
    Loading,
    Ready,
    Error(String),
}

/// The ordered, paginated root-comment list and the rules for reconciling
/// it against fetch results and push events.
///
/// Deliberately free of I/O: the application issues the fetches and feeds
/// results back in, tagged with the `(page, sort)` they were requested
/// under. Results whose tag no longer matches the current state are
/// discarded, so a slow response for an abandoned sort or page can never
/// clobber the visible list.
#[derive(Debug, Clone)]
pub struct FeedSync {
    phase: FeedPhase,
    comments: Vec<CommentNode>,
    total: u64,
    page: u32,
    pages_loaded: u32,
    sort: SortKey,
    page_size: usize,
    append_mode: bool,
}

impl FeedSync {
    pub fn new(page_size: usize, append_mode: bool) -> Self {
        Self {
            phase: FeedPhase::Idle,
            comments: Vec::new(),
            total: 0,
            page: 1,
            pages_loaded: 1,
            sort: SortKey::default(),
            page_size: page_size.max(1),
            append_mode,
        }
    }

    pub fn phase(&self) -> &FeedPhase {
        &self.phase
    }

    pub fn comments(&self) -> &[CommentNode] {
        &self.comments
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn sort(&self) -> SortKey {
        self.sort
    }

    pub fn is_loading(&self) -> bool {
        self.phase == FeedPhase::Loading
    }

    pub fn page_count(&self) -> u32 {
        let pages = self.total.div_ceil(self.page_size as u64);
        pages.max(1) as u32
    }

    /// Mark a fetch for the current `(page, sort)` as in flight.
    pub fn begin_load(&mut self) {
        self.phase = FeedPhase::Loading;
    }

    /// Header click: same column flips direction, new column starts
    /// descending. Always resets to page one and drops any accumulation —
    /// pages fetched under another sort must never extend this one.
    pub fn set_sort(&mut self, field: SortField) {
        self.sort = self.sort.toggled(field);
        self.page = 1;
        self.pages_loaded = 1;
    }

    /// After posting a comment the list returns to the newest-first front
    /// page, where the new entry will be visible.
    pub fn reset_to_newest(&mut self) {
        self.sort = SortKey::default();
        self.page = 1;
        self.pages_loaded = 1;
    }

    /// Classic pagination. Returns false when the page is out of range or
    /// unchanged.
    pub fn set_page(&mut self, page: u32) -> bool {
        if page < 1 || page > self.page_count() || page == self.page {
            return false;
        }
        self.page = page;
        self.pages_loaded = 1;
        true
    }

    /// Append mode: request the next page under the current sort key.
    /// Returns the `(page, sort)` tag to fetch with, or `None` when append
    /// mode is off, a load is already running, or everything is loaded.
    pub fn request_more(&mut self) -> Option<(u32, SortKey)> {
        if !self.append_mode || self.phase == FeedPhase::Loading {
            return None;
        }
        if u64::from(self.pages_loaded) * self.page_size as u64 >= self.total {
            return None;
        }
        self.page = self.pages_loaded + 1;
        self.phase = FeedPhase::Loading;
        Some((self.page, self.sort))
    }

    /// Apply a fetched page. The `(page, sort)` tag must still match the
    /// current state; stale results are dropped. Page one (and every page in
    /// replace mode) replaces the list wholesale so the visible set always
    /// matches the declared sort; in append mode later pages extend it.
    pub fn page_loaded(&mut self, page: u32, sort: SortKey, payload: FeedPayload) {
        if sort != self.sort || page != self.page {
            debug!(page, "discarding stale feed page");
            return;
        }
        let nodes: Vec<CommentNode> = payload
            .results
            .into_iter()
            .map(|comment| comment.normalize())
            .collect();
        if self.append_mode && page > 1 {
            self.comments.extend(nodes);
            self.pages_loaded = page;
        } else {
            self.comments = nodes;
            self.pages_loaded = 1;
        }
        self.total = payload.count;
        self.phase = FeedPhase::Ready;
    }

    /// A failed fetch for the current tag: keep the data, surface the
    /// message. Stale failures are dropped like stale successes.
    pub fn load_failed(&mut self, page: u32, sort: SortKey, message: String) {
        if sort != self.sort || page != self.page {
            debug!(page, "discarding stale feed failure");
            return;
        }
        self.phase = FeedPhase::Error(message);
    }

    /// Merge one push event. The total badge counts every creation event
    /// exactly once; the node itself is only prepended when the visible
    /// list starts with the newest-first front page and the id is not
    /// already present. Returns whether the visible list changed.
    pub fn apply_push(&mut self, event: &PushEvent) -> bool {
        let PushEvent::CommentCreated(payload) = event else {
            // Replies are not root entries; the thread view handles them.
            return false;
        };
        self.total += 1;

        let front_page_visible = self.append_mode || self.page == 1;
        if !self.sort.is_newest_first() || !front_page_visible {
            // Prepending here would contradict the declared order; the list
            // stays stale until the next explicit refresh.
            return false;
        }
        if self.comments.iter().any(|comment| comment.id == payload.id) {
            // The creator's own refresh raced the push event.
            return false;
        }

        self.comments.insert(0, payload.clone().normalize());
        let capacity = self.page_size * self.pages_loaded.max(1) as usize;
        self.comments.truncate(capacity);
        true
    }
}
