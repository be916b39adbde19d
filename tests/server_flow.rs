//! End-to-end tests of the HTTP surface with a stand-in model.

use std::io::Cursor;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use tower::ServiceExt;

use plate_inpaint::pipeline::{InpaintRequest, Inpainter};
use plate_inpaint::server::{self, AppState, HealthResponse, DEFAULT_MAX_UPLOAD_BYTES};
use plate_inpaint::{Error, Result};

const BOUNDARY: &str = "plate-inpaint-test-boundary";

/// Fills every inpaintable pixel with green.
struct GreenFill;

impl Inpainter for GreenFill {
    fn inpaint(&mut self, request: &InpaintRequest<'_>) -> Result<RgbImage> {
        let mut out = request.image.clone();
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            if request.mask.get_pixel(x, y)[0] == 255 {
                *pixel = Rgb([0, 255, 0]);
            }
        }
        Ok(out)
    }
}

/// Always fails like an exhausted accelerator would.
struct OutOfMemory;

impl Inpainter for OutOfMemory {
    fn inpaint(&mut self, _request: &InpaintRequest<'_>) -> Result<RgbImage> {
        Err(Error::Worker {
            reason: "out of memory".to_string(),
        })
    }
}

fn app(state: AppState) -> axum::Router {
    server::router(Arc::new(state), DEFAULT_MAX_UPLOAD_BYTES)
}

fn plate_png(width: u32, height: u32) -> Vec<u8> {
    let plate = RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255]));
    let mut bytes = Cursor::new(Vec::new());
    plate.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
}

fn multipart_body(file: Option<&[u8]>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(file) = file {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"file\"; filename=\"plate.png\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        body.extend_from_slice(file);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn generate_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/generate")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn error_body(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn test_health_before_model_load() {
    let response = app(AppState::new())
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let raw = body_bytes(response).await;
    assert_eq!(
        serde_json::from_slice::<serde_json::Value>(&raw).unwrap(),
        serde_json::json!({"status": "ok", "model_loaded": false})
    );
}

#[tokio::test]
async fn test_health_after_model_load() {
    let response = app(AppState::with_model(Box::new(GreenFill)))
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let health: HealthResponse = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(
        health,
        HealthResponse {
            status: "ok".to_string(),
            model_loaded: true,
        }
    );
}

#[tokio::test]
async fn test_generate_without_model_is_unavailable() {
    let body = multipart_body(Some(&plate_png(200, 100)), &[]);
    let response = app(AppState::new())
        .oneshot(generate_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = error_body(response).await;
    assert_eq!(json["detail"], "Model failed to load. Check server logs.");
    assert_eq!(json["kind"], "model_unavailable");
}

#[tokio::test]
async fn test_generate_returns_png_with_plate_preserved() {
    let body = multipart_body(
        Some(&plate_png(200, 100)),
        &[("prompt", "a red sports car"), ("seed", "7"), ("steps", "5")],
    );
    let response = app(AppState::with_model(Box::new(GreenFill)))
        .oneshot(generate_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");

    let output = image::load_from_memory(&body_bytes(response).await)
        .unwrap()
        .to_rgb8();
    assert_eq!(output.dimensions(), (512, 512));
    // Plate is 128x64 at (192, 332)
    assert_eq!(output.get_pixel(192, 332), &Rgb([255, 0, 0]));
    assert_eq!(output.get_pixel(319, 395), &Rgb([255, 0, 0]));
    assert_eq!(output.get_pixel(191, 332), &Rgb([0, 255, 0]));
    assert_eq!(output.get_pixel(192, 331), &Rgb([0, 255, 0]));
    assert_eq!(output.get_pixel(10, 10), &Rgb([0, 255, 0]));
}

#[tokio::test]
async fn test_generate_applies_translation() {
    let body = multipart_body(Some(&plate_png(200, 100)), &[("x", "-100.7"), ("y", "20")]);
    let response = app(AppState::with_model(Box::new(GreenFill)))
        .oneshot(generate_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let output = image::load_from_memory(&body_bytes(response).await)
        .unwrap()
        .to_rgb8();
    // 192 - 100.7 truncates to 91
    assert_eq!(output.get_pixel(91, 352), &Rgb([255, 0, 0]));
    assert_eq!(output.get_pixel(90, 352), &Rgb([0, 255, 0]));
}

#[tokio::test]
async fn test_generate_unreadable_file() {
    let body = multipart_body(Some(b"this is not an image"), &[]);
    let response = app(AppState::with_model(Box::new(GreenFill)))
        .oneshot(generate_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = error_body(response).await;
    assert_eq!(json["kind"], "validation");
    assert!(json["detail"]
        .as_str()
        .unwrap()
        .starts_with("failed to decode image"));
}

#[tokio::test]
async fn test_generate_missing_file() {
    let body = multipart_body(None, &[("prompt", "a car")]);
    let response = app(AppState::with_model(Box::new(GreenFill)))
        .oneshot(generate_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_body(response).await["kind"], "validation");
}

#[tokio::test]
async fn test_generate_rejects_bad_numbers() {
    for fields in [
        [("scale", "0")],
        [("scale", "wide")],
        [("steps", "0")],
        [("rotation", "NaN")],
    ] {
        let body = multipart_body(Some(&plate_png(20, 10)), &fields);
        let response = app(AppState::with_model(Box::new(GreenFill)))
            .oneshot(generate_request(body))
            .await
            .unwrap();

        assert_eq!(
            response.status(),
            StatusCode::INTERNAL_SERVER_ERROR,
            "{fields:?}"
        );
        assert_eq!(error_body(response).await["kind"], "validation", "{fields:?}");
    }
}

#[tokio::test]
async fn test_model_failure_is_processing_error() {
    let body = multipart_body(Some(&plate_png(200, 100)), &[]);
    let response = app(AppState::with_model(Box::new(OutOfMemory)))
        .oneshot(generate_request(body))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = error_body(response).await;
    assert_eq!(json["kind"], "processing");
    assert!(json["detail"].as_str().unwrap().contains("out of memory"));
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let response = app(AppState::new())
        .oneshot(
            Request::get("/")
                .header(header::ORIGIN, "http://localhost:5173")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}
