use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use catmap_api::auth::{AdminSeed, AppState, AppStateInner, AuthService, bootstrap_admin};
use catmap_api::routes::router;
use catmap_api::storage::{MAX_UPLOAD_SIZE, Storage};
use catmap_db::Database;

const BOUNDARY: &str = "catmap-test-boundary";

struct TestApp {
    app: Router,
    state: AppState,
}

impl TestApp {
    fn new() -> Self {
        let upload_dir = std::env::temp_dir().join(format!("catmap-api-test-{}", Uuid::new_v4()));
        let state: AppState = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            auth: AuthService::new("integration-secret", chrono::Duration::hours(1)).unwrap(),
            storage: Storage::new(upload_dir),
        });
        Self {
            app: router(state.clone()),
            state,
        }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, body)
    }

    async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(Method::DELETE)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        self.send(req).await
    }

    async fn register(&self, user_name: &str, password: &str) -> Value {
        let (status, body) = self
            .json(
                Method::POST,
                "/users",
                None,
                json!({
                    "user_name": user_name,
                    "email": format!("{}@example.com", user_name),
                    "password": password,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body
    }

    async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.json(
            Method::POST,
            "/auth/login",
            None,
            json!({ "username": email, "password": password }),
        )
        .await
    }

    async fn token_for(&self, user_name: &str) -> String {
        self.register(user_name, "secret").await;
        let (status, body) = self.login(&format!("{}@example.com", user_name), "secret").await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    async fn admin_token(&self) -> String {
        let seed = AdminSeed {
            user_name: "boss".into(),
            email: "boss@example.com".into(),
            password: "hunter22".into(),
        };
        bootstrap_admin(&self.state, &seed).unwrap();
        let (status, body) = self.login("boss@example.com", "hunter22").await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    async fn create_cat(&self, token: &str, fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/cats")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(fields, file)))
            .unwrap();
        self.send(req).await
    }

    async fn cat_at(&self, token: &str, name: &str, lat: &str, lng: &str) -> Value {
        let (status, body) = self
            .create_cat(
                token,
                &[
                    ("cat_name", name),
                    ("weight", "4.2"),
                    ("birthdate", "2020-02-29"),
                    ("lat", lat),
                    ("lng", lng),
                ],
                Some(("image/jpeg", &b"\xff\xd8\xff fake jpeg"[..])),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["data"].clone()
    }
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    if let Some((content_type, data)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"cat\"; filename=\"cat.jpg\"\r\nContent-Type: {}\r\n\r\n",
                BOUNDARY, content_type
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

// -- Users and authentication --

#[tokio::test]
async fn register_strips_private_fields() {
    let app = TestApp::new();
    let body = app.register("tom", "secret").await;

    assert_eq!(body["message"], "user created");
    assert_eq!(body["data"]["user_name"], "tom");
    assert!(body["data"].get("password").is_none());
    assert!(body["data"].get("role").is_none());

    let (status, users) = app.get("/users", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(users.as_array().unwrap().len(), 1);
    assert!(users[0].get("password").is_none());

    let id = body["data"]["id"].as_str().unwrap();
    let (status, user) = app.get(&format!("/users/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(user["email"], "tom@example.com");
}

#[tokio::test]
async fn register_cannot_choose_role() {
    let app = TestApp::new();
    let (status, _) = app
        .json(
            Method::POST,
            "/users",
            None,
            json!({ "user_name": "tom", "email": "tom@example.com", "password": "secret", "role": "admin" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.register("tom", "secret").await;
    let (_, body) = app.login("tom@example.com", "secret").await;
    assert_eq!(body["user"]["role"], "user");
}

#[tokio::test]
async fn register_reports_all_field_errors() {
    let app = TestApp::new();
    let (status, body) = app
        .json(
            Method::POST,
            "/users",
            None,
            json!({ "user_name": "to", "email": "nope", "password": "1234" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 400);
    assert_eq!(
        body["message"],
        "must be a valid email: email, must be at least 5 characters: password, must be at least 3 characters: user_name"
    );
}

#[tokio::test]
async fn duplicate_registration_rejected() {
    let app = TestApp::new();
    app.register("tom", "secret").await;
    let (status, body) = app
        .json(
            Method::POST,
            "/users",
            None,
            json!({ "user_name": "tommy", "email": "tom@example.com", "password": "secret" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "user_name or email already in use");
}

#[tokio::test]
async fn login_does_not_reveal_unknown_users() {
    let app = TestApp::new();
    app.register("tom", "secret").await;

    let (status, body) = app.login("tom@example.com", "secret").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

    let wrong = app.login("tom@example.com", "wrong").await;
    let unknown = app.login("ghost@example.com", "secret").await;
    assert_eq!(wrong.0, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong, unknown);
}

#[tokio::test]
async fn token_echo() {
    let app = TestApp::new();
    let token = app.token_for("tom").await;

    let (status, body) = app.get("/users/token", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_name"], "tom");
    assert!(body.get("role").is_none());

    let (status, body) = app.get("/users/token", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "token not valid");

    let (status, _) = app.get("/users/token", Some("not.a.jwt")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn update_and_delete_own_account() {
    let app = TestApp::new();
    let token = app.token_for("tom").await;
    let misu = app.cat_at(&token, "Misu", "60.0", "24.0").await;
    let picture = app.state.storage.dir().join(misu["filename"].as_str().unwrap());
    assert!(picture.exists());

    let (status, body) = app
        .json(Method::PUT, "/users/me", Some(&token), json!({ "password": "better-secret" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "user updated");
    assert_eq!(app.login("tom@example.com", "secret").await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(app.login("tom@example.com", "better-secret").await.0, StatusCode::OK);

    let (status, body) = app
        .json(Method::PUT, "/users/me", Some(&token), json!({ "role": "admin" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);

    let (status, body) = app.delete("/users/me", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "user deleted");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app.get(&format!("/users/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "User not found");

    let (_, cats) = app.get("/cats", None).await;
    assert!(cats.as_array().unwrap().is_empty());
    assert!(!picture.exists());
}

#[tokio::test]
async fn update_rejects_taken_email() {
    let app = TestApp::new();
    let tom = app.token_for("tom").await;
    app.register("jerry", "secret").await;

    let (status, body) = app
        .json(Method::PUT, "/users/me", Some(&tom), json!({ "email": "jerry@example.com" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "user_name or email already in use");

    let (_, me) = app.get("/users/token", Some(&tom)).await;
    assert_eq!(me["email"], "tom@example.com");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_with_same_email() {
    let app = &TestApp::new();
    let attempt = move |user_name: &'static str| {
        app.json(
            Method::POST,
            "/users",
            None,
            json!({ "user_name": user_name, "email": "twin@example.com", "password": "secret" }),
        )
    };

    let (first, second) = tokio::join!(attempt("twin_one"), attempt("twin_two"));
    let mut results = [first, second];
    results.sort_by_key(|(status, _)| status.as_u16());

    assert_eq!(results[0].0, StatusCode::CREATED);
    assert_eq!(results[1].0, StatusCode::BAD_REQUEST);
    assert_eq!(results[1].1["message"], "user_name or email already in use");

    let (_, users) = app.get("/users", None).await;
    assert_eq!(users.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn token_of_deleted_account_rejected() {
    let app = TestApp::new();
    let token = app.token_for("tom").await;
    let (status, _) = app.delete("/users/me", &token).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get("/users/token", Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "token not valid");

    let (status, body) = app
        .create_cat(
            &token,
            &[
                ("cat_name", "Misu"),
                ("weight", "4.2"),
                ("birthdate", "2020-02-29"),
                ("lat", "60.0"),
                ("lng", "24.0"),
            ],
            Some(("image/jpeg", &b"jpeg"[..])),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "token not valid");
}

#[tokio::test]
async fn token_reflects_account_changes() {
    let app = TestApp::new();
    let token = app.token_for("tom").await;
    let (status, _) = app
        .json(Method::PUT, "/users/me", Some(&token), json!({ "user_name": "thomas" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, me) = app.get("/users/token", Some(&token)).await;
    assert_eq!(me["user_name"], "thomas");
}

// -- Cats --

#[tokio::test]
async fn create_sets_owner_from_principal() {
    let app = TestApp::new();
    let tom = app.token_for("tom").await;
    let jerry = app.register("jerry", "secret").await;
    let jerry_id = jerry["data"]["id"].as_str().unwrap();

    let (status, body) = app
        .create_cat(
            &tom,
            &[
                ("cat_name", "Misu"),
                ("weight", "4.2"),
                ("birthdate", "2020-02-29"),
                ("lat", "60.17"),
                ("lng", "24.94"),
                ("owner", jerry_id),
            ],
            Some(("image/png", &b"png bytes"[..])),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["message"], "cat created");
    assert_eq!(body["data"]["owner"]["user_name"], "tom");
    assert!(body["data"]["owner"].get("password").is_none());
    assert_eq!(
        body["data"]["location"],
        json!({ "type": "Point", "coordinates": [24.94, 60.17] })
    );
    assert_eq!(body["data"]["birthdate"], "2020-02-29");

    let id = body["data"]["id"].as_str().unwrap();
    let (status, cat) = app.get(&format!("/cats/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cat["cat_name"], "Misu");

    let (_, mine) = app.get("/cats/user", Some(&tom)).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);

    let filename = body["data"]["filename"].as_str().unwrap();
    let response = app
        .app
        .clone()
        .oneshot(Request::builder().uri(format!("/uploads/{}", filename)).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"png bytes");
}

#[tokio::test]
async fn create_requires_image_and_fields() {
    let app = TestApp::new();
    let tom = app.token_for("tom").await;
    let fields = [
        ("cat_name", "Misu"),
        ("weight", "4.2"),
        ("birthdate", "2020-02-29"),
        ("lat", "60.17"),
        ("lng", "24.94"),
    ];

    let (status, body) = app.create_cat(&tom, &fields, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "file not valid");

    let (status, body) = app.create_cat(&tom, &fields, Some(("text/plain", &b"hello"[..]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "file not valid");

    let (status, body) = app
        .create_cat(&tom, &[("cat_name", "Misu")], Some(("image/jpeg", &b"jpeg"[..])))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "is required: birthdate, is required: lat, is required: lng, is required: weight"
    );

    let (status, _) = app.create_cat("bogus", &fields, Some(("image/jpeg", &b"jpeg"[..]))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn oversized_picture_rejected() {
    let app = TestApp::new();
    let tom = app.token_for("tom").await;
    let fields = [
        ("cat_name", "Misu"),
        ("weight", "4.2"),
        ("birthdate", "2020-02-29"),
        ("lat", "60.17"),
        ("lng", "24.94"),
    ];

    // just over the picture cap, still under the request body limit
    let barely_over = vec![0u8; MAX_UPLOAD_SIZE + 1];
    let (status, body) = app.create_cat(&tom, &fields, Some(("image/jpeg", &barely_over[..]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "file not valid");

    // over the request body limit as well
    let huge = vec![0u8; 11 * 1024 * 1024];
    let (status, body) = app.create_cat(&tom, &fields, Some(("image/jpeg", &huge[..]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "file not valid");

    let at_cap = vec![0u8; MAX_UPLOAD_SIZE];
    let (status, body) = app.create_cat(&tom, &fields, Some(("image/jpeg", &at_cap[..]))).await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (_, cats) = app.get("/cats", None).await;
    assert_eq!(cats.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn lookup_by_id() {
    let app = TestApp::new();

    let (status, body) = app.get("/cats/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid id: id");

    let (status, body) = app.get(&format!("/cats/{}", Uuid::new_v4()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Cat not found");
}

#[tokio::test]
async fn owner_can_update_and_delete() {
    let app = TestApp::new();
    let tom = app.token_for("tom").await;
    let cat = app.cat_at(&tom, "Misu", "60.0", "24.0").await;
    let uri = format!("/cats/{}", cat["id"].as_str().unwrap());

    let (status, body) = app
        .json(Method::PUT, &uri, Some(&tom), json!({ "weight": 5.1, "lat": 61.0, "lng": 25.0 }))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["message"], "cat updated");
    assert_eq!(body["data"]["weight"], 5.1);
    assert_eq!(body["data"]["cat_name"], "Misu");
    assert_eq!(body["data"]["location"]["coordinates"], json!([25.0, 61.0]));

    let (status, body) = app.json(Method::PUT, &uri, Some(&tom), json!({ "lat": 61.0 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "lat and lng must be supplied together: body");

    let (status, body) = app.delete(&uri, &tom).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "cat deleted");

    let filename = body["data"]["filename"].as_str().unwrap();
    assert!(!app.state.storage.dir().join(filename).exists());
    assert_eq!(app.get(&uri, None).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_owner_sees_not_found() {
    let app = TestApp::new();
    let tom = app.token_for("tom").await;
    let jerry = app.token_for("jerry").await;
    let cat = app.cat_at(&tom, "Misu", "60.0", "24.0").await;
    let uri = format!("/cats/{}", cat["id"].as_str().unwrap());
    let missing = format!("/cats/{}", Uuid::new_v4());

    let foreign = app.json(Method::PUT, &uri, Some(&jerry), json!({ "cat_name": "Mine" })).await;
    let absent = app.json(Method::PUT, &missing, Some(&jerry), json!({ "cat_name": "Mine" })).await;
    assert_eq!(foreign.0, StatusCode::NOT_FOUND);
    assert_eq!(foreign, absent);

    let foreign = app.delete(&uri, &jerry).await;
    let absent = app.delete(&missing, &jerry).await;
    assert_eq!(foreign.0, StatusCode::NOT_FOUND);
    assert_eq!(foreign, absent);

    let (_, unchanged) = app.get(&uri, None).await;
    assert_eq!(unchanged["cat_name"], "Misu");
}

#[tokio::test]
async fn admin_routes_ignore_ownership() {
    let app = TestApp::new();
    let tom = app.token_for("tom").await;
    let admin = app.admin_token().await;
    let cat = app.cat_at(&tom, "Misu", "60.0", "24.0").await;
    let id = cat["id"].as_str().unwrap();
    let admin_uri = format!("/cats/admin/{}", id);

    // the owner is not an admin
    let (status, body) = app
        .json(Method::PUT, &admin_uri, Some(&tom), json!({ "cat_name": "Hacked" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Admin only");
    assert_eq!(app.delete(&admin_uri, &tom).await.0, StatusCode::FORBIDDEN);
    let (_, unchanged) = app.get(&format!("/cats/{}", id), None).await;
    assert_eq!(unchanged["cat_name"], "Misu");

    let (status, body) = app
        .json(Method::PUT, &admin_uri, Some(&admin), json!({ "cat_name": "Renamed" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["cat_name"], "Renamed");
    assert_eq!(body["data"]["owner"]["user_name"], "tom");

    let (status, body) = app.delete(&admin_uri, &admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "cat deleted");

    let (status, _) = app.delete(&admin_uri, &admin).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn area_query() {
    let app = TestApp::new();
    let tom = app.token_for("tom").await;
    app.cat_at(&tom, "Inside", "39.5", "-73.5").await;
    app.cat_at(&tom, "Corner", "40.0", "-73.0").await;
    app.cat_at(&tom, "Outside", "41.0", "-73.5").await;

    let (status, body) = app
        .get("/cats/area?topRight=40.0,-73.0&bottomLeft=39.0,-74.0", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let mut names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["cat_name"].as_str().unwrap())
        .collect();
    names.sort();
    assert_eq!(names, vec!["Corner", "Inside"]);

    // corners in the other order
    let (_, swapped) = app
        .get("/cats/area?topRight=39.0,-74.0&bottomLeft=40.0,-73.0", None)
        .await;
    assert_eq!(swapped.as_array().unwrap().len(), 2);

    for bad in [
        "/cats/area?topRight=NaN,-73.0&bottomLeft=39.0,-74.0",
        "/cats/area?topRight=95.0,-73.0&bottomLeft=39.0,-74.0",
        "/cats/area?topRight=40.0&bottomLeft=39.0,-74.0",
        "/cats/area?topRight=40.0,-73.0",
    ] {
        let (status, body) = app.get(bad, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}: {}", bad, body);
        assert_eq!(body["status"], 400);
    }
}

#[tokio::test]
async fn health() {
    let app = TestApp::new();
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
