mod common;

use anyhow::Result;
use common::TestApp;
use school_fees_api::auth::Role;

#[tokio::test]
async fn health_and_root_are_public() -> Result<()> {
    let app = TestApp::spawn().await?;

    let res = app.client.get(app.url("/health")).send().await?;
    assert_eq!(res.status().as_u16(), 200);
    let body: serde_json::Value = res.json().await?;
    assert_eq!(body["data"]["status"], "ok");

    let res = app.client.get(app.url("/")).send().await?;
    assert_eq!(res.status().as_u16(), 200);
    Ok(())
}

#[tokio::test]
async fn api_requires_bearer_token() -> Result<()> {
    let app = TestApp::spawn().await?;

    let res = app.client.get(app.url("/api/fee-structures")).send().await?;
    assert_eq!(res.status().as_u16(), 401);
    let body: serde_json::Value = res.json().await?;
    assert_eq!(body["code"], "UNAUTHORIZED");

    let res = app
        .client
        .get(app.url("/api/fee-structures"))
        .bearer_auth("not-a-jwt")
        .send()
        .await?;
    assert_eq!(res.status().as_u16(), 401);

    let (status, _) = app.get(Role::Teacher, "/api/fee-structures").await?;
    assert_eq!(status, 200);
    Ok(())
}

#[tokio::test]
async fn financial_mutations_are_role_gated() -> Result<()> {
    let app = TestApp::spawn().await?;
    app.seed_structures().await?;

    let (status, body) = app
        .post(
            Role::Teacher,
            "/api/enrollments",
            serde_json::json!({
                "studentId": app.students[0],
                "classId": app.class_v,
                "sectionId": app.section_v_a
            }),
        )
        .await?;
    assert_eq!(status, 403);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = app.get(Role::Staff, "/api/ledger").await?;
    assert_eq!(status, 403);
    Ok(())
}
