use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::extractors::AuthUser,
    error::AppError,
    extract::{Json, Path},
    images::services::UploadItem,
    posts::dto::{
        CommentRequest, CreatePostRequest, MessageResponse, PostListResponse, PostMessageResponse,
        PostResponse, UpdatePostRequest, UploadResponse,
    },
    state::AppState,
};

const COVER_FIELD: &str = "coverImage";

// --- public routers ---

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_posts))
        .route("/:id", get(get_post))
}

pub fn write_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/", post(create_post))
        .route("/:id", put(update_post).delete(delete_post))
        .route("/:id/like", put(like_post))
        .route("/:id/unlike", put(unlike_post))
        .route("/:id/comments", post(add_comment))
        .route(
            "/:id/upload",
            post(upload_cover).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
}

// --- handlers ---

#[instrument(skip(state, body))]
pub async fn create_post(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(body): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<PostResponse>), AppError> {
    let post = state
        .posts
        .create_post(&identity, &body.title, &body.content, body.tags)
        .await?;
    Ok((StatusCode::CREATED, Json(PostResponse { success: true, post })))
}

#[instrument(skip(state))]
pub async fn list_posts(State(state): State<AppState>) -> Result<Json<PostListResponse>, AppError> {
    let posts = state.posts.list_posts().await?;
    Ok(Json(PostListResponse { success: true, posts }))
}

#[instrument(skip(state))]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PostResponse>, AppError> {
    let post = state.posts.get_post(id).await?;
    Ok(Json(PostResponse { success: true, post }))
}

#[instrument(skip(state, identity, body))]
pub async fn update_post(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdatePostRequest>,
) -> Result<Json<PostMessageResponse>, AppError> {
    let post = state.posts.update_post(&identity, id, body).await?;
    Ok(Json(PostMessageResponse {
        success: true,
        message: "Post updated successfully",
        post,
    }))
}

#[instrument(skip(state, identity))]
pub async fn delete_post(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>, AppError> {
    state.posts.delete_post(&identity, id).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Post deleted successfully",
    }))
}

#[instrument(skip(state, identity))]
pub async fn like_post(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PostMessageResponse>, AppError> {
    let post = state.posts.like_post(&identity, id).await?;
    Ok(Json(PostMessageResponse {
        success: true,
        message: "Post liked",
        post,
    }))
}

#[instrument(skip(state, identity))]
pub async fn unlike_post(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PostMessageResponse>, AppError> {
    let post = state.posts.unlike_post(&identity, id).await?;
    Ok(Json(PostMessageResponse {
        success: true,
        message: "Post unliked",
        post,
    }))
}

#[instrument(skip(state, identity, body))]
pub async fn add_comment(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CommentRequest>,
) -> Result<Json<PostMessageResponse>, AppError> {
    let post = state.posts.add_comment(&identity, id, &body.comment).await?;
    Ok(Json(PostMessageResponse {
        success: true,
        message: "Comment added",
        post,
    }))
}

/// POST /api/posts/:id/upload (multipart)
/// Field: coverImage, a single jpg/png/webp file.
#[instrument(skip(state, identity, mp))]
pub async fn upload_cover(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(id): Path<Uuid>,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut mp = mp?;
    let mut upload = None;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::validation(e.body_text()))?
    {
        if field.name() != Some(COVER_FIELD) {
            continue;
        }
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        let body = field
            .bytes()
            .await
            .map_err(|e| AppError::validation(e.body_text()))?;
        upload = Some(UploadItem { body, content_type });
        break;
    }
    let item = upload.ok_or_else(|| AppError::validation("No image uploaded"))?;

    let (image_url, post) = state.posts.upload_cover(&identity, id, item).await?;
    Ok(Json(UploadResponse {
        success: true,
        message: "Image uploaded successfully",
        image_url,
        post,
    }))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{app::build_app, state::AppState};

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn json_req(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn register(app: &Router, name: &str) -> String {
        let (status, body) = send(
            app,
            json_req(
                Method::POST,
                "/api/auth/register",
                None,
                json!({
                    "username": name,
                    "email": format!("{name}@example.com"),
                    "password": "correct-horse",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["token"].as_str().unwrap().to_string()
    }

    async fn create_post(app: &Router, token: &str) -> String {
        let (status, body) = send(
            app,
            json_req(
                Method::POST,
                "/api/posts",
                Some(token),
                json!({ "title": "Hello", "content": "World", "tags": ["intro"] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        body["post"]["id"].as_str().unwrap().to_string()
    }

    fn multipart_req(uri: &str, token: &str, field: &str, content_type: &str) -> Request<Body> {
        let boundary = "X-BOUNDARY";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"cover.png\"\r\n\
             Content-Type: {content_type}\r\n\r\n\
             fakeimagebytes\r\n\
             --{boundary}--\r\n"
        );
        Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn post_lifecycle_over_http() {
        let app = build_app(AppState::fake());
        let alice = register(&app, "alice").await;
        let bob = register(&app, "bob").await;
        let id = create_post(&app, &alice).await;

        let (status, body) = send(
            &app,
            Request::get("/api/posts").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["posts"].as_array().unwrap().len(), 1);
        assert_eq!(body["posts"][0]["author"]["username"], "alice");

        let uri = format!("/api/posts/{id}");
        let (status, body) =
            send(&app, json_req(Method::PUT, &uri, Some(&bob), json!({ "title": "x" }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let (status, body) =
            send(&app, json_req(Method::PUT, &uri, Some(&alice), json!({ "title": "Hi" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["post"]["title"], "Hi");

        let like = format!("/api/posts/{id}/like");
        let (status, _) = send(&app, json_req(Method::PUT, &like, Some(&bob), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, json_req(Method::PUT, &like, Some(&bob), json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "already_liked");

        let comments = format!("/api/posts/{id}/comments");
        let (status, body) = send(
            &app,
            json_req(Method::POST, &comments, Some(&bob), json!({ "comment": "great" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["post"]["comments"][0]["comment"], "great");

        let (status, body) = send(&app, Request::get(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["post"]["likes"].as_array().unwrap().len(), 1);

        let (status, _) =
            send(&app, json_req(Method::DELETE, &uri, Some(&bob), json!({}))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) =
            send(&app, json_req(Method::DELETE, &uri, Some(&alice), json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, Request::get(&uri).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn writes_require_a_token() {
        let app = build_app(AppState::fake());
        let (status, body) = send(
            &app,
            json_req(Method::POST, "/api/posts", None, json!({ "title": "a", "content": "b" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "missing_token");
    }

    #[tokio::test]
    async fn bad_ids_and_bodies_use_the_error_envelope() {
        let app = build_app(AppState::fake());
        let alice = register(&app, "alice").await;

        let (status, body) = send(
            &app,
            Request::get("/api/posts/not-a-uuid").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "validation");

        let (status, body) = send(
            &app,
            json_req(Method::POST, "/api/posts", Some(&alice), json!({ "title": "no body" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");

        let id = create_post(&app, &alice).await;
        let req = Request::post(format!("/api/posts/{id}/upload"))
            .header(header::AUTHORIZATION, format!("Bearer {alice}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");
    }

    #[tokio::test]
    async fn cover_upload_over_http() {
        let app = build_app(AppState::fake());
        let alice = register(&app, "alice").await;
        let id = create_post(&app, &alice).await;
        let uri = format!("/api/posts/{id}/upload");

        let (status, body) = send(&app, multipart_req(&uri, &alice, "coverImage", "image/png")).await;
        assert_eq!(status, StatusCode::OK);
        let url = body["imageUrl"].as_str().unwrap();
        assert!(url.contains("blog_images/"));
        assert_eq!(body["post"]["coverImage"], url);

        let (status, body) = send(&app, multipart_req(&uri, &alice, "coverImage", "image/gif")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");

        let (status, _) = send(&app, multipart_req(&uri, &alice, "other", "image/png")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
