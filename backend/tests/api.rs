#[macro_use]
mod support;

use actix_web::http::{StatusCode, header};
use actix_web::test;
use actix_web::HttpMessage;
use shared::{
    DiseaseDetail, DiseaseSummary, ErrorResponse, HealthResponse, PredictionResponse, Treatment,
};
use support::{StubLoader, TestState, multipart_body, png_bytes, predict_request};

const LABELS: [&str; 3] = ["early blight", "healthy", "septoria leaf spot"];
const RED: [u8; 3] = [255, 0, 0];
const GREEN: [u8; 3] = [0, 255, 0];

#[actix_web::test]
async fn predict_returns_label_confidence_and_knowledge() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    let body = multipart_body("file", Some("tomato leaf.png"), &png_bytes(RED));
    let resp = test::call_service(&app, predict_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let prediction: PredictionResponse = test::read_body_json(resp).await;
    assert_eq!(prediction.disease, "Septoria Leaf Spot");
    assert_eq!(prediction.disease_key, "septoria leaf spot");
    // softmax over margins [-1, -1, 2]
    assert_eq!(prediction.confidence, 90.94);
    assert!(prediction.description.starts_with("Septoria leaf spot is a fungal disease"));
    assert!(!prediction.symptoms.is_empty());
    assert!(matches!(prediction.treatment, Treatment::Steps(ref steps) if !steps.is_empty()));
    assert!(prediction.image_path.starts_with("/uploads/"));
    assert!(prediction.image_path.ends_with("_tomato_leaf.png"));
    assert_eq!(state.stored_files().len(), 1);
}

#[actix_web::test]
async fn healthy_prediction_carries_note_treatment() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    let body = multipart_body("file", Some("leaf.jpg.png"), &png_bytes(GREEN));
    let resp = test::call_service(&app, predict_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let prediction: PredictionResponse = test::read_body_json(resp).await;
    assert_eq!(prediction.disease, "Healthy");
    assert!(matches!(prediction.treatment, Treatment::Note(_)));
}

#[actix_web::test]
async fn label_without_knowledge_entry_gets_empty_details() {
    let loader = StubLoader::with_labels(&["early blight", "healthy", "leaf curl x"]);
    let state = TestState::new(loader);
    let app = test_app!(state);

    let body = multipart_body("file", Some("leaf.png"), &png_bytes(RED));
    let resp = test::call_service(&app, predict_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let prediction: PredictionResponse = test::read_body_json(resp).await;
    assert_eq!(prediction.disease, "Leaf Curl X");
    assert_eq!(prediction.description, "");
    assert!(prediction.symptoms.is_empty());
    assert!(prediction.prevention.is_empty());
}

#[actix_web::test]
async fn stored_upload_is_served_back() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);
    let image = png_bytes(GREEN);

    let body = multipart_body("file", Some("leaf.png"), &image);
    let resp = test::call_service(&app, predict_request(body).to_request()).await;
    let prediction: PredictionResponse = test::read_body_json(resp).await;

    let req = test::TestRequest::get().uri(&prediction.image_path).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(test::read_body(resp).await.as_ref(), image.as_slice());
}

#[actix_web::test]
async fn unknown_upload_is_not_found() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    for uri in ["/uploads/nothing.png", "/uploads/..%2Fsecret.png"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
}

#[actix_web::test]
async fn disallowed_extension_is_rejected_and_not_stored() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    let body = multipart_body("file", Some("notes.txt"), b"hello");
    let resp = test::call_service(&app, predict_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let error: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(error.error, "Invalid file format. Allowed: png, jpg, jpeg, gif, bmp");
    assert!(state.stored_files().is_empty());
    assert_eq!(state.model.load_attempts(), 0);
}

#[actix_web::test]
async fn missing_file_field_is_rejected() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    let body = multipart_body("image", Some("leaf.png"), &png_bytes(RED));
    let resp = test::call_service(&app, predict_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let error: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(error.error, "No file provided");
}

#[actix_web::test]
async fn empty_filename_is_rejected() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    let body = multipart_body("file", Some(""), &png_bytes(RED));
    let resp = test::call_service(&app, predict_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let error: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(error.error, "No file selected");
}

#[actix_web::test]
async fn oversized_upload_is_rejected() {
    let state = TestState::with_max_bytes(StubLoader::with_labels(&LABELS), 1024);
    let app = test_app!(state);

    let body = multipart_body("file", Some("leaf.png"), &vec![0u8; 4096]);
    let resp = test::call_service(&app, predict_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let error: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(error.error, "File too large. Maximum size is 1024 bytes");
    assert!(state.stored_files().is_empty());
}

#[actix_web::test]
async fn default_limit_rejects_one_byte_over_sixteen_mib() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    let file = vec![0u8; 16 * 1024 * 1024 + 1];
    for with_length in [true, false] {
        let body = multipart_body("file", Some("leaf.png"), &file);
        let mut req = predict_request(body).to_request();
        if !with_length {
            req.headers_mut().remove(header::CONTENT_LENGTH);
        }
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.status(),
            StatusCode::PAYLOAD_TOO_LARGE,
            "length header: {}",
            with_length
        );

        let error: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(error.error, "File too large. Maximum size is 16MB");
    }
    assert!(state.stored_files().is_empty());
    assert_eq!(state.model.load_attempts(), 0);
}

#[actix_web::test]
async fn upload_without_content_length_is_limited_while_streaming() {
    let state = TestState::with_max_bytes(StubLoader::with_labels(&LABELS), 1024);
    let app = test_app!(state);

    let body = multipart_body("file", Some("leaf.png"), &vec![0u8; 4096]);
    let mut req = predict_request(body).to_request();
    req.headers_mut().remove(header::CONTENT_LENGTH);
    assert!(!req.headers().contains_key(header::CONTENT_LENGTH));

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(state.stored_files().is_empty());
}

#[actix_web::test]
async fn file_at_the_limit_is_accepted_without_content_length() {
    let image = png_bytes(GREEN);
    let state = TestState::with_max_bytes(StubLoader::with_labels(&LABELS), image.len());
    let app = test_app!(state);

    let body = multipart_body("file", Some("leaf.png"), &image);
    let mut req = predict_request(body).to_request();
    req.headers_mut().remove(header::CONTENT_LENGTH);

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(state.stored_files().len(), 1);
}

#[actix_web::test]
async fn undecodable_image_is_a_client_error() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    let body = multipart_body("file", Some("leaf.png"), b"definitely not a png");
    let resp = test::call_service(&app, predict_request(body).to_request()).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let error: ErrorResponse = test::read_body_json(resp).await;
    assert!(error.error.starts_with("Image could not be decoded"), "{}", error.error);
}

#[actix_web::test]
async fn unavailable_models_are_a_server_error() {
    let state = TestState::new(StubLoader::failing());
    let app = test_app!(state);

    for _ in 0..2 {
        let body = multipart_body("file", Some("leaf.png"), &png_bytes(RED));
        let resp = test::call_service(&app, predict_request(body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let error: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(
            error.error,
            "Failed to load models: malformed artifact: models/xgb_classifier_model.json is missing"
        );
    }
    assert_eq!(state.model.load_attempts(), 2);
}

#[actix_web::test]
async fn disease_pages_resolve_known_keys_only() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    let req = test::TestRequest::get().uri("/disease/Late%20Blight").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let html = String::from_utf8(test::read_body(resp).await.to_vec()).unwrap();
    assert!(html.contains("<h1>Late Blight</h1>"));

    let req = test::TestRequest::get().uri("/disease/unknown-disease").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(test::read_body(resp).await.as_ref(), b"Disease not found");
}

#[actix_web::test]
async fn pages_render() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    for uri in ["/", "/predictor"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK, "{}", uri);
    }
    let req = test::TestRequest::get().uri("/no/such/page").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn disease_api_lists_and_details() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    let req = test::TestRequest::get().uri("/api/diseases").to_request();
    let summaries: Vec<DiseaseSummary> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(summaries.len(), 10);
    assert_eq!(summaries[0].key, "bacterial spot");

    let req = test::TestRequest::get().uri("/api/diseases/leaf%20mold").to_request();
    let detail: DiseaseDetail = test::call_and_read_body_json(&app, req).await;
    assert_eq!(detail.name, "Leaf Mold");
    assert!(!detail.record.prevention.is_empty());

    let req = test::TestRequest::get().uri("/api/diseases/rust").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn health_reports_model_state() {
    let state = TestState::new(StubLoader::with_labels(&LABELS));
    let app = test_app!(state);

    let req = test::TestRequest::get().uri("/api/health").to_request();
    let health: HealthResponse = test::call_and_read_body_json(&app, req).await;
    assert!(!health.models_loaded);
    assert_eq!(health.load_attempts, 0);

    let body = multipart_body("file", Some("leaf.png"), &png_bytes(RED));
    test::call_service(&app, predict_request(body).to_request()).await;

    let req = test::TestRequest::get().uri("/api/health").to_request();
    let health: HealthResponse = test::call_and_read_body_json(&app, req).await;
    assert!(health.models_loaded);
    assert_eq!(health.status, "ok");
    assert_eq!(health.load_attempts, 1);
}
