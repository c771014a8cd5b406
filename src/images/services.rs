use anyhow::Context;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::AppError;
use crate::storage::StorageClient;

const COVER_FOLDER: &str = "blog_images";

pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

fn cover_key(post_id: Uuid, ext: &str) -> String {
    format!("{}/{}-{}.{}", COVER_FOLDER, post_id, Uuid::new_v4(), ext)
}

fn is_external_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://")
}

/// True only for keys `store_cover` minted for this very post. Anything else
/// on the post (external URLs, other posts' keys) is never deleted through it.
pub fn owns_cover_key(post_id: Uuid, value: &str) -> bool {
    value
        .strip_prefix(COVER_FOLDER)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|rest| rest.strip_prefix(post_id.to_string().as_str()))
        .is_some_and(|rest| rest.starts_with('-') && !rest.contains('/'))
}

/// True when `url` is how `key` is served: the local `/uploads/<key>` path or
/// a (presigned) object URL, query string ignored.
pub fn url_names_key(url: &str, key: &str) -> bool {
    if key.is_empty() || is_external_url(key) {
        return url == key;
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.strip_suffix(key)
        .is_some_and(|prefix| prefix.ends_with('/'))
}

/// Covers set through a post update must be absolute http(s) URLs; storage
/// keys only come from uploads.
pub fn check_cover_url(value: &str) -> Result<(), AppError> {
    if is_external_url(value) && !value.chars().any(char::is_whitespace) {
        Ok(())
    } else {
        Err(AppError::validation("Cover image must be an http(s) URL"))
    }
}

/// Writes a cover image for `post_id` and returns its storage key.
pub async fn store_cover(
    storage: &dyn StorageClient,
    post_id: Uuid,
    item: UploadItem,
) -> Result<String, AppError> {
    if item.body.is_empty() {
        return Err(AppError::validation("No image uploaded"));
    }
    let ext = ext_from_mime(&item.content_type).ok_or_else(|| {
        AppError::validation("Unsupported image type, expected jpg, png or webp")
    })?;

    let key = cover_key(post_id, ext);
    storage
        .put_object(&key, item.body, &item.content_type)
        .await
        .with_context(|| format!("put_object {}", key))?;
    Ok(key)
}

/// Turns a stored cover value into something a client can load. Absolute
/// URLs pass through, empty stays empty.
pub async fn resolve_url(storage: &dyn StorageClient, value: &str) -> anyhow::Result<String> {
    if value.is_empty() || is_external_url(value) {
        return Ok(value.to_string());
    }
    storage
        .public_url(value)
        .await
        .with_context(|| format!("public url for {}", value))
}

#[cfg(test)]
mod image_tests {
    use super::*;
    use crate::storage::LocalStorage;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/heic"), None);
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[test]
    fn test_cover_key_layout() {
        let post_id = Uuid::new_v4();
        let key = cover_key(post_id, "png");
        assert!(key.starts_with(&format!("blog_images/{}-", post_id)));
        assert!(key.ends_with(".png"));
        assert_ne!(key, cover_key(post_id, "png"));
    }

    #[test]
    fn test_owns_cover_key() {
        let post_id = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(owns_cover_key(post_id, &cover_key(post_id, "png")));
        assert!(!owns_cover_key(post_id, &cover_key(other, "png")));
        assert!(!owns_cover_key(post_id, ""));
        assert!(!owns_cover_key(post_id, "https://cdn.example.com/a.png"));
        assert!(!owns_cover_key(post_id, &format!("blog_images/{post_id}.png")));
        assert!(!owns_cover_key(post_id, &format!("blog_images/{post_id}-x/../../secret")));
        assert!(!owns_cover_key(post_id, &format!("other/{post_id}-x.png")));
    }

    #[test]
    fn test_url_names_key() {
        let key = "blog_images/p-1.png";
        assert!(url_names_key("http://blog.test/uploads/blog_images/p-1.png", key));
        assert!(url_names_key(
            "https://s3.test/bucket/blog_images/p-1.png?X-Amz-Signature=abc",
            key
        ));
        assert!(!url_names_key("https://cdn.example.com/other.png", key));
        assert!(!url_names_key("https://x/zblog_images/p-1.png", key));
        assert!(url_names_key("https://cdn.example.com/a.png", "https://cdn.example.com/a.png"));
        assert!(!url_names_key("https://cdn.example.com/a.png", ""));
    }

    #[test]
    fn test_check_cover_url() {
        assert!(check_cover_url("https://cdn.example.com/a.png").is_ok());
        assert!(check_cover_url("http://cdn.example.com/a.png").is_ok());
        for bad in ["blog_images/a.png", "", "httpx/a.png", "ftp://x/a.png", "https://a b"] {
            assert!(matches!(check_cover_url(bad), Err(AppError::Validation(_))), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_store_and_resolve_cover() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://blog.test");
        let post_id = Uuid::new_v4();

        let key = store_cover(
            &storage,
            post_id,
            UploadItem {
                body: Bytes::from_static(b"\x89PNG"),
                content_type: "image/png".into(),
            },
        )
        .await
        .unwrap();
        assert!(dir.path().join(&key).exists());

        let url = resolve_url(&storage, &key).await.unwrap();
        assert_eq!(url, format!("http://blog.test/uploads/{}", key));
        assert_eq!(
            resolve_url(&storage, "https://cdn.example.com/x.jpg").await.unwrap(),
            "https://cdn.example.com/x.jpg"
        );
        assert_eq!(resolve_url(&storage, "").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_store_cover_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path(), "http://blog.test");

        let err = store_cover(
            &storage,
            Uuid::new_v4(),
            UploadItem { body: Bytes::from_static(b"GIF89a"), content_type: "image/gif".into() },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = store_cover(
            &storage,
            Uuid::new_v4(),
            UploadItem { body: Bytes::new(), content_type: "image/png".into() },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
