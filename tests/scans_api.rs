#![cfg(feature = "inmem-store")]

use actix_web::{test, web, App};
use dumps::repo::inmem::InMemRepo;
use dumps::storage::LocalImageStore;
use dumps::{config, AppState};
use serde_json::{json, Value};
use std::sync::Arc;

fn state() -> AppState {
    let uploads = std::env::temp_dir().join(format!("dumps-scans-{}", uuid::Uuid::new_v4()));
    AppState {
        repo: Arc::new(InMemRepo::ephemeral()),
        image_store: Arc::new(LocalImageStore::new(uploads).unwrap()),
        presigner: None,
        rate_limiter: None,
        trust_forwarded: false,
    }
}

fn thought(content: &str) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/api/scans/wild-thought")
        .set_json(json!({ "content": content }))
}

#[actix_web::test]
async fn scans_are_counted_in_order() {
    let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(config)).await;

    let req = test::TestRequest::get().uri("/api/scans/count").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v["total"], 0);

    let expected = ["1st", "2nd", "3rd", "4th"];
    for (i, ord) in expected.iter().enumerate() {
        let req = test::TestRequest::post()
            .uri("/api/scans/track")
            .insert_header(("User-Agent", "qr-test"))
            .to_request();
        let v: Value = test::call_and_read_body_json(&app, req).await;
        let n = i as i64 + 1;
        assert_eq!(v["position"], n);
        assert_eq!(v["total"], n);
        assert_eq!(v["message"], format!("You're the {ord} student to scan!"));
    }

    let req = test::TestRequest::get().uri("/api/scans/count").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v["total"], 4);
}

#[actix_web::test]
async fn wild_thought_validation() {
    let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(config)).await;

    let resp = test::call_service(&app, thought("   \n ").to_request()).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "Content cannot be empty");

    let resp = test::call_service(&app, thought(&"a".repeat(5001)).to_request()).await;
    assert_eq!(resp.status(), 400);

    // exactly at the bound is fine
    let resp = test::call_service(&app, thought(&"a".repeat(5000)).to_request()).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/api/scans/wild-thoughts/count").to_request();
    let v: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(v["total"], 1);
}

#[actix_web::test]
async fn wild_thoughts_listing_hides_addresses() {
    let app = test::init_service(App::new().app_data(web::Data::new(state())).configure(config)).await;

    let v: Value = test::call_and_read_body_json(&app, thought("  first thought  ").to_request()).await;
    assert_eq!(v["success"], true);
    assert_eq!(v["message"], "Your wild thought has been dumped!");
    assert!(v["id"].is_i64());
    test::call_service(&app, thought("second thought").to_request()).await;
    test::call_service(&app, thought("third thought").to_request()).await;

    let req = test::TestRequest::get().uri("/api/scans/wild-thoughts?limit=2").to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["total"], 3);
    assert_eq!(page["has_more"], true);
    let items = page["thoughts"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["content"], "third thought");
    for t in items {
        assert!(t.get("ip_address").is_none());
        assert!(t["created_at"].is_string());
    }

    let req = test::TestRequest::get().uri("/api/scans/wild-thoughts?limit=2&page=2").to_request();
    let page: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page["has_more"], false);
    assert_eq!(page["thoughts"][0]["content"], "first thought");

    let req = test::TestRequest::get().uri("/api/scans/wild-thoughts?limit=500").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}
