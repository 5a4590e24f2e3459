use serde::{Deserialize, Serialize};
use strum_macros::Display;

pub const DEFAULT_AVATAR: &str = "/default-avatar.png";
pub const ANONYMOUS_LABEL: &str = "Anon";

/// Feed sort columns, rendered into the `sort_by` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SortField {
    Created,
    Username,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// The sort a feed page was fetched under. Pages and push events are only
/// merged when their key matches the active one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub field: SortField,
    pub order: SortOrder,
}

impl Default for SortKey {
    fn default() -> Self {
        Self {
            field: SortField::Created,
            order: SortOrder::Desc,
        }
    }
}

impl SortKey {
    /// Toggle behavior of the feed table header: same column flips the
    /// direction, a new column starts descending.
    pub fn toggled(self, field: SortField) -> Self {
        if self.field == field {
            let order = match self.order {
                SortOrder::Asc => SortOrder::Desc,
                SortOrder::Desc => SortOrder::Asc,
            };
            Self { field, order }
        } else {
            Self {
                field,
                order: SortOrder::Desc,
            }
        }
    }

    pub fn is_newest_first(&self) -> bool {
        self.field == SortField::Created && self.order == SortOrder::Desc
    }
}

/// Server-confirmed reaction state of the viewing user on one comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reaction {
    Liked,
    Disliked,
    #[default]
    None,
}

impl Reaction {
    fn from_wire(liked: Option<bool>) -> Self {
        match liked {
            Some(true) => Reaction::Liked,
            Some(false) => Reaction::Disliked,
            None => Reaction::None,
        }
    }
}

/// Direction of a reaction intent issued from the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Document,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub id: u64,
    pub kind: AttachmentKind,
    pub uri: String,
    pub display_name: Option<String>,
}

/// One comment with its fully materialized reply tree. Snapshots are
/// immutable: reconciliation builds a new tree, never edits nodes in place.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentNode {
    pub id: String,
    pub author_label: String,
    pub author_email: Option<String>,
    pub avatar: String,
    pub created_at: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub like_count: u32,
    pub reaction: Reaction,
    pub edited: bool,
    pub replies: Vec<CommentNode>,
}

impl CommentNode {
    pub fn contains(&self, id: &str) -> bool {
        if self.id == id {
            return true;
        }
        let mut stack: Vec<&CommentNode> = self.replies.iter().collect();
        while let Some(node) = stack.pop() {
            if node.id == id {
                return true;
            }
            stack.extend(node.replies.iter());
        }
        false
    }
}

/// Authenticated identity returned by the login/register endpoints and kept
/// next to the token pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct User {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Access/refresh token pair. Always replaced as a whole, never one half at
/// a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub access: String,
    pub refresh: String,
}

// ---------------------------------------------------------------------------
// Wire payloads (field names follow the server's serializers)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthorPayload {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttachmentPayload {
    pub id: u64,
    pub file: String,
    #[serde(default)]
    pub attachment_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommentPayload {
    pub id: String,
    #[serde(default)]
    pub author: Option<AuthorPayload>,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default)]
    pub guest_name: Option<String>,
    #[serde(default)]
    pub guest_email: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub liked: Option<bool>,
    #[serde(default)]
    pub likes_count: Option<u32>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub created: String,
    #[serde(default)]
    pub updated: Option<String>,
}

impl CommentPayload {
    /// Total normalization into the domain node: every optional the server
    /// may omit gets a deterministic default so nothing downstream branches
    /// on absence. Replies start empty; the thread loader attaches them.
    pub fn normalize(self) -> CommentNode {
        let author_label = self
            .author_name
            .or(self.guest_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| ANONYMOUS_LABEL.to_string());
        let author_email = self.author_email.or(self.guest_email);
        let avatar = self
            .author
            .and_then(|author| author.avatar)
            .unwrap_or_else(|| DEFAULT_AVATAR.to_string());

        CommentNode {
            id: self.id,
            author_label,
            author_email,
            avatar,
            created_at: self.created,
            text: self.text.unwrap_or_default(),
            attachments: self
                .attachments
                .into_iter()
                .map(AttachmentPayload::normalize)
                .collect(),
            like_count: self.likes_count.unwrap_or(0),
            reaction: Reaction::from_wire(self.liked),
            edited: self.edited,
            replies: Vec::new(),
        }
    }
}

impl AttachmentPayload {
    fn normalize(self) -> Attachment {
        let kind = match self.attachment_type.as_deref() {
            Some("image") => AttachmentKind::Image,
            _ => AttachmentKind::Document,
        };
        let display_name = self
            .file
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        Attachment {
            id: self.id,
            kind,
            uri: self.file,
            display_name,
        }
    }
}

/// One page of root comments as the list endpoint returns it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FeedPayload {
    #[serde(default)]
    pub results: Vec<CommentPayload>,
    #[serde(default)]
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Captcha {
    pub key: String,
    pub image_url: String,
}
