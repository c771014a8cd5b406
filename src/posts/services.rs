use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{repo::UserRepo, services::Identity},
    error::AppError,
    images::services::{
        check_cover_url, owns_cover_key, resolve_url, store_cover, url_names_key, UploadItem,
    },
    posts::{
        dto::{AuthorSummary, CommentView, PostView, UpdatePostRequest},
        repo::PostRepo,
        repo_types::{NewPost, Post, PostChanges},
    },
    storage::StorageClient,
};

pub struct PostService {
    posts: Arc<dyn PostRepo>,
    users: Arc<dyn UserRepo>,
    storage: Arc<dyn StorageClient>,
}

impl PostService {
    pub fn new(
        posts: Arc<dyn PostRepo>,
        users: Arc<dyn UserRepo>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            posts,
            users,
            storage,
        }
    }

    #[instrument(skip(self, author, content, tags), fields(user_id = %author.id))]
    pub async fn create_post(
        &self,
        author: &Identity,
        title: &str,
        content: &str,
        tags: Vec<String>,
    ) -> Result<PostView, AppError> {
        let title = title.trim();
        let content = content.trim();
        if title.is_empty() {
            return Err(AppError::validation("Title is required"));
        }
        if content.is_empty() {
            return Err(AppError::validation("Content is required"));
        }

        let post = self
            .posts
            .insert(NewPost {
                title: title.to_string(),
                content: content.to_string(),
                author_id: author.id,
                tags: clean_tags(tags),
            })
            .await?;
        info!(post_id = %post.id, "post created");
        self.view(post).await
    }

    pub async fn list_posts(&self) -> Result<Vec<PostView>, AppError> {
        let posts = self.posts.list().await?;
        self.views(posts).await
    }

    pub async fn get_post(&self, id: Uuid) -> Result<PostView, AppError> {
        self.reload(id).await
    }

    #[instrument(skip(self, identity, req), fields(user_id = %identity.id))]
    pub async fn update_post(
        &self,
        identity: &Identity,
        id: Uuid,
        req: UpdatePostRequest,
    ) -> Result<PostView, AppError> {
        let post = self.owned_post(identity, id).await?;

        // Clients see the resolved URL, so echoing it back is not a change.
        let cover_image = match non_empty(req.cover_image) {
            Some(url) if !url_names_key(&url, &post.cover_image) => {
                check_cover_url(&url)?;
                url
            }
            _ => post.cover_image.clone(),
        };
        let changes = PostChanges {
            title: non_empty(req.title).unwrap_or_else(|| post.title.clone()),
            content: non_empty(req.content).unwrap_or_else(|| post.content.clone()),
            tags: req.tags.map(clean_tags).unwrap_or_else(|| post.tags.clone()),
            cover_image,
        };
        let replaced_cover = (changes.cover_image != post.cover_image).then_some(&post.cover_image);

        let updated = self
            .posts
            .update(id, changes)
            .await?
            .ok_or(AppError::NotFound("post"))?;
        if let Some(old) = replaced_cover {
            self.discard_cover(id, old).await;
        }
        info!(post_id = %id, "post updated");
        self.view(updated).await
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.id))]
    pub async fn delete_post(&self, identity: &Identity, id: Uuid) -> Result<(), AppError> {
        let post = self.owned_post(identity, id).await?;
        if !self.posts.delete(id).await? {
            return Err(AppError::NotFound("post"));
        }
        self.discard_cover(id, &post.cover_image).await;
        info!(post_id = %id, "post deleted");
        Ok(())
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.id))]
    pub async fn like_post(&self, identity: &Identity, id: Uuid) -> Result<PostView, AppError> {
        match self.posts.add_like(id, identity.id).await? {
            None => return Err(AppError::NotFound("post")),
            Some(false) => return Err(AppError::AlreadyLiked),
            Some(true) => {}
        }
        self.reload(id).await
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.id))]
    pub async fn unlike_post(&self, identity: &Identity, id: Uuid) -> Result<PostView, AppError> {
        match self.posts.remove_like(id, identity.id).await? {
            None => return Err(AppError::NotFound("post")),
            Some(false) => return Err(AppError::NotLiked),
            Some(true) => {}
        }
        self.reload(id).await
    }

    #[instrument(skip(self, identity, comment), fields(user_id = %identity.id))]
    pub async fn add_comment(
        &self,
        identity: &Identity,
        id: Uuid,
        comment: &str,
    ) -> Result<PostView, AppError> {
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(AppError::validation("Comment is required"));
        }
        self.posts
            .add_comment(id, identity.id, comment)
            .await?
            .ok_or(AppError::NotFound("post"))?;
        self.reload(id).await
    }

    /// Stores a new cover for a post the caller owns. Returns the image URL
    /// and the updated post.
    #[instrument(skip(self, identity, item), fields(user_id = %identity.id))]
    pub async fn upload_cover(
        &self,
        identity: &Identity,
        id: Uuid,
        item: UploadItem,
    ) -> Result<(String, PostView), AppError> {
        let post = self.owned_post(identity, id).await?;
        let key = store_cover(self.storage.as_ref(), id, item).await?;

        let Some(updated) = self.posts.set_cover(id, &key).await? else {
            // post vanished while we were uploading
            self.discard_cover(id, &key).await;
            return Err(AppError::NotFound("post"));
        };
        self.discard_cover(id, &post.cover_image).await;

        let url = resolve_url(self.storage.as_ref(), &key).await?;
        info!(post_id = %id, key = %key, "cover image uploaded");
        Ok((url, self.view(updated).await?))
    }

    async fn existing_post(&self, id: Uuid) -> Result<Post, AppError> {
        self.posts.find(id).await?.ok_or(AppError::NotFound("post"))
    }

    async fn owned_post(&self, identity: &Identity, id: Uuid) -> Result<Post, AppError> {
        let post = self.existing_post(id).await?;
        if post.author_id != identity.id {
            warn!(post_id = %id, author_id = %post.author_id, "ownership check failed");
            return Err(AppError::Forbidden);
        }
        Ok(post)
    }

    async fn reload(&self, id: Uuid) -> Result<PostView, AppError> {
        let post = self.existing_post(id).await?;
        self.view(post).await
    }

    /// Deletes a cover object minted for `post_id`. Anything else is left
    /// alone. Failures are logged, never returned.
    async fn discard_cover(&self, post_id: Uuid, value: &str) {
        if !owns_cover_key(post_id, value) {
            return;
        }
        if let Err(e) = self.storage.delete_object(value).await {
            warn!(error = %e, key = %value, "failed to delete cover image");
        }
    }

    async fn view(&self, post: Post) -> Result<PostView, AppError> {
        Ok(self.views(vec![post]).await?.remove(0))
    }

    async fn views(&self, posts: Vec<Post>) -> Result<Vec<PostView>, AppError> {
        let mut author_ids: Vec<Uuid> = posts.iter().map(|p| p.author_id).collect();
        author_ids.sort_unstable();
        author_ids.dedup();
        let authors: HashMap<Uuid, AuthorSummary> = self
            .users
            .find_many(&author_ids)
            .await?
            .iter()
            .map(|u| (u.id, AuthorSummary::from(u)))
            .collect();

        let mut out = Vec::with_capacity(posts.len());
        for p in posts {
            let cover_image = resolve_url(self.storage.as_ref(), &p.cover_image).await?;
            out.push(PostView {
                id: p.id,
                title: p.title,
                content: p.content,
                author: authors.get(&p.author_id).cloned(),
                tags: p.tags,
                cover_image,
                likes: p.likes,
                views: p.views,
                comments: p.comments.into_iter().map(CommentView::from).collect(),
                created_at: p.created_at,
                updated_at: p.updated_at,
            });
        }
        Ok(out)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
