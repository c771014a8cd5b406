use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::posts::repo_types::{Comment, NewPost, Post, PostChanges, PostRow};

/// Post storage. Writes against a post return `None` when the post does not
/// exist (or was deleted concurrently). Like and unlike report whether
/// anything changed so the duplicate check happens inside the store.
#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn insert(&self, new: NewPost) -> anyhow::Result<Post>;
    /// Newest first.
    async fn list(&self) -> anyhow::Result<Vec<Post>>;
    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Post>>;
    async fn update(&self, id: Uuid, changes: PostChanges) -> anyhow::Result<Option<Post>>;
    /// Replaces only the cover, leaving concurrent edits to other fields alone.
    async fn set_cover(&self, id: Uuid, cover_image: &str) -> anyhow::Result<Option<Post>>;
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;
    /// `Some(false)` when the user had already liked the post.
    async fn add_like(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<bool>>;
    /// `Some(false)` when there was no like to remove.
    async fn remove_like(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<bool>>;
    async fn add_comment(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        text: &str,
    ) -> anyhow::Result<Option<Comment>>;
}

/// Likes and comments reference `posts`; users are never deleted, so a
/// foreign-key failure on insert means the post is gone.
fn is_missing_post(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

const POST_COLUMNS: &str =
    "id, title, content, author_id, tags, cover_image, views, created_at, updated_at";

pub struct PgPostRepo {
    db: PgPool,
}

impl PgPostRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Attaches likes and comments to a batch of rows with two queries.
    async fn hydrate(&self, rows: Vec<PostRow>) -> anyhow::Result<Vec<Post>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();

        let likes = sqlx::query_as::<_, (Uuid, Uuid)>(
            r#"
            SELECT post_id, user_id
              FROM post_likes
             WHERE post_id = ANY($1)
             ORDER BY liked_at ASC
            "#,
        )
        .bind(&ids[..])
        .fetch_all(&self.db)
        .await
        .context("load likes")?;

        let comments = sqlx::query_as::<_, Comment>(
            r#"
            SELECT id, post_id, user_id, comment, created_at
              FROM post_comments
             WHERE post_id = ANY($1)
             ORDER BY created_at ASC
            "#,
        )
        .bind(&ids[..])
        .fetch_all(&self.db)
        .await
        .context("load comments")?;

        let mut likes_by_post: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (post_id, user_id) in likes {
            likes_by_post.entry(post_id).or_default().push(user_id);
        }
        let mut comments_by_post: HashMap<Uuid, Vec<Comment>> = HashMap::new();
        for c in comments {
            comments_by_post.entry(c.post_id).or_default().push(c);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let likes = likes_by_post.remove(&row.id).unwrap_or_default();
                let comments = comments_by_post.remove(&row.id).unwrap_or_default();
                row.into_post(likes, comments)
            })
            .collect())
    }

    async fn hydrate_one(&self, row: Option<PostRow>) -> anyhow::Result<Option<Post>> {
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl PostRepo for PgPostRepo {
    async fn insert(&self, new: NewPost) -> anyhow::Result<Post> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            INSERT INTO posts (id, title, content, author_id, tags)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.title)
        .bind(&new.content)
        .bind(new.author_id)
        .bind(&new.tags)
        .fetch_one(&self.db)
        .await
        .context("insert post")?;
        Ok(row.into_post(Vec::new(), Vec::new()))
    }

    async fn list(&self) -> anyhow::Result<Vec<Post>> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts ORDER BY created_at DESC"
        ))
        .fetch_all(&self.db)
        .await
        .context("list posts")?;
        self.hydrate(rows).await
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find post")?;
        self.hydrate_one(row).await
    }

    async fn update(&self, id: Uuid, changes: PostChanges) -> anyhow::Result<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            UPDATE posts
               SET title = $2, content = $3, tags = $4, cover_image = $5, updated_at = now()
             WHERE id = $1
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&changes.title)
        .bind(&changes.content)
        .bind(&changes.tags)
        .bind(&changes.cover_image)
        .fetch_optional(&self.db)
        .await
        .context("update post")?;
        self.hydrate_one(row).await
    }

    async fn set_cover(&self, id: Uuid, cover_image: &str) -> anyhow::Result<Option<Post>> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            UPDATE posts
               SET cover_image = $2, updated_at = now()
             WHERE id = $1
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(cover_image)
        .fetch_optional(&self.db)
        .await
        .context("set post cover")?;
        self.hydrate_one(row).await
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let res = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .context("delete post")?;
        Ok(res.rows_affected() == 1)
    }

    async fn add_like(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<bool>> {
        let res = sqlx::query(
            r#"
            INSERT INTO post_likes (post_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .execute(&self.db)
        .await;
        match res {
            Ok(done) => Ok(Some(done.rows_affected() == 1)),
            Err(e) if is_missing_post(&e) => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context("insert like")),
        }
    }

    async fn remove_like(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<bool>> {
        let (post_exists, removed) = sqlx::query_as::<_, (bool, bool)>(
            r#"
            WITH removed AS (
                DELETE FROM post_likes
                 WHERE post_id = $1 AND user_id = $2
                RETURNING 1
            )
            SELECT EXISTS (SELECT 1 FROM posts WHERE id = $1),
                   EXISTS (SELECT 1 FROM removed)
            "#,
        )
        .bind(post_id)
        .bind(user_id)
        .fetch_one(&self.db)
        .await
        .context("delete like")?;
        Ok(post_exists.then_some(removed))
    }

    async fn add_comment(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        text: &str,
    ) -> anyhow::Result<Option<Comment>> {
        let res = sqlx::query_as::<_, Comment>(
            r#"
            INSERT INTO post_comments (id, post_id, user_id, comment)
            VALUES ($1, $2, $3, $4)
            RETURNING id, post_id, user_id, comment, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(post_id)
        .bind(user_id)
        .bind(text)
        .fetch_one(&self.db)
        .await;
        match res {
            Ok(comment) => Ok(Some(comment)),
            Err(e) if is_missing_post(&e) => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context("insert comment")),
        }
    }
}

/// Process-local store used by tests and `STORE_BACKEND=memory`. Posts are
/// kept in creation order.
#[derive(Default)]
pub struct MemoryPostRepo {
    posts: RwLock<Vec<Post>>,
}

impl MemoryPostRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostRepo for MemoryPostRepo {
    async fn insert(&self, new: NewPost) -> anyhow::Result<Post> {
        let now = OffsetDateTime::now_utc();
        let post = Post {
            id: Uuid::new_v4(),
            title: new.title,
            content: new.content,
            author_id: new.author_id,
            tags: new.tags,
            cover_image: String::new(),
            likes: Vec::new(),
            views: 0,
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.posts.write().await.push(post.clone());
        Ok(post)
    }

    async fn list(&self) -> anyhow::Result<Vec<Post>> {
        Ok(self.posts.read().await.iter().rev().cloned().collect())
    }

    async fn find(&self, id: Uuid) -> anyhow::Result<Option<Post>> {
        Ok(self.posts.read().await.iter().find(|p| p.id == id).cloned())
    }

    async fn update(&self, id: Uuid, changes: PostChanges) -> anyhow::Result<Option<Post>> {
        let mut posts = self.posts.write().await;
        Ok(posts.iter_mut().find(|p| p.id == id).map(|p| {
            p.title = changes.title;
            p.content = changes.content;
            p.tags = changes.tags;
            p.cover_image = changes.cover_image;
            p.updated_at = OffsetDateTime::now_utc();
            p.clone()
        }))
    }

    async fn set_cover(&self, id: Uuid, cover_image: &str) -> anyhow::Result<Option<Post>> {
        let mut posts = self.posts.write().await;
        Ok(posts.iter_mut().find(|p| p.id == id).map(|p| {
            p.cover_image = cover_image.to_string();
            p.updated_at = OffsetDateTime::now_utc();
            p.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut posts = self.posts.write().await;
        let before = posts.len();
        posts.retain(|p| p.id != id);
        Ok(posts.len() != before)
    }

    async fn add_like(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<bool>> {
        let mut posts = self.posts.write().await;
        let Some(post) = posts.iter_mut().find(|p| p.id == post_id) else {
            return Ok(None);
        };
        if post.is_liked_by(user_id) {
            return Ok(Some(false));
        }
        post.likes.push(user_id);
        Ok(Some(true))
    }

    async fn remove_like(&self, post_id: Uuid, user_id: Uuid) -> anyhow::Result<Option<bool>> {
        let mut posts = self.posts.write().await;
        let Some(post) = posts.iter_mut().find(|p| p.id == post_id) else {
            return Ok(None);
        };
        let before = post.likes.len();
        post.likes.retain(|id| *id != user_id);
        Ok(Some(post.likes.len() != before))
    }

    async fn add_comment(
        &self,
        post_id: Uuid,
        user_id: Uuid,
        text: &str,
    ) -> anyhow::Result<Option<Comment>> {
        let mut posts = self.posts.write().await;
        let Some(post) = posts.iter_mut().find(|p| p.id == post_id) else {
            return Ok(None);
        };
        let comment = Comment {
            id: Uuid::new_v4(),
            post_id,
            user_id,
            comment: text.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        post.comments.push(comment.clone());
        Ok(Some(comment))
    }
}
