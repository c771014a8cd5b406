use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// A post with its likes and comments loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_id: Uuid,
    pub tags: Vec<String>,
    pub cover_image: String, // storage key, absolute url, or empty
    pub likes: Vec<Uuid>,
    pub views: i64,
    pub comments: Vec<Comment>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Post {
    pub fn is_liked_by(&self, user_id: Uuid) -> bool {
        self.likes.contains(&user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub user_id: Uuid,
    pub comment: String,
    pub created_at: OffsetDateTime,
}

/// Row of the `posts` table, before likes and comments are attached.
#[derive(Debug, FromRow)]
pub struct PostRow {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author_id: Uuid,
    pub tags: Vec<String>,
    pub cover_image: String,
    pub views: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl PostRow {
    pub fn into_post(self, likes: Vec<Uuid>, comments: Vec<Comment>) -> Post {
        Post {
            id: self.id,
            title: self.title,
            content: self.content,
            author_id: self.author_id,
            tags: self.tags,
            cover_image: self.cover_image,
            likes,
            views: self.views,
            comments,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub author_id: Uuid,
    pub tags: Vec<String>,
}

/// Editable fields; the service fills in every field, old or new.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostChanges {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub cover_image: String,
}
