mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, expect_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn cloning_fills_defaults_and_counts_usage() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let org = app.insert_organization("Acme").await?;
    let (user_id, token) = app.user_with_token("ivan@acme.test", "INSPECTOR", Some(org)).await?;
    let template_id = app
        .insert_template(
            "Kitchen Hygiene Audit",
            "food-safety",
            json!({"checkpoints": [
                {"title": "Fridge temperature", "fieldType": "NUMBER", "isRequired": true,
                 "section": "Cold Chain", "config": {"max": 8}},
                {"title": "Observations"},
                {"question": "Pest control evidence", "type": "MULTISELECT",
                 "config": {"options": ["None", "Droppings"]}}
            ]}),
        )
        .await?;

    let clone = expect_json(
        app.post_json(&format!("/api/templates/{template_id}/clone"), &json!({}), Some(&token))
            .await?,
        StatusCode::CREATED,
    )
    .await?;

    assert_eq!(clone["title"], "Kitchen Hygiene Audit (Copy)");
    assert_eq!(clone["status"], "DRAFT");
    assert_eq!(clone["category"], "food-safety");
    assert_eq!(clone["creator_id"], user_id.to_string());
    assert_eq!(clone["organization_id"], org.to_string());

    let checkpoints = clone["checkpoints"].as_array().unwrap();
    assert_eq!(checkpoints.len(), 3);
    assert_eq!(checkpoints[0]["section"], "Cold Chain");
    assert_eq!(checkpoints[0]["is_required"], true);
    assert_eq!(checkpoints[1]["field_type"], "TEXT");
    assert_eq!(checkpoints[1]["section"], "General");
    assert_eq!(checkpoints[1]["is_required"], false);
    assert_eq!(checkpoints[2]["title"], "Pest control evidence");
    assert_eq!(checkpoints[2]["field_type"], "MULTISELECT");

    let catalog = expect_json(app.get("/api/templates", Some(&token)).await?, StatusCode::OK).await?;
    assert_eq!(catalog[0]["usage_count"], 1);
    assert_eq!(catalog[0]["checkpoint_count"], 3);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn catalog_is_sorted_by_usage_and_filtered_by_category() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let (_, token) = app.user_with_token("ivan@acme.test", "INSPECTOR", None).await?;
    let data = json!({"checkpoints": [{"title": "Check"}]});
    app.insert_template("Alpha Audit", "safety", data.clone()).await?;
    let popular = app.insert_template("Zulu Audit", "safety", data.clone()).await?;
    app.insert_template("Server Walkthrough", "IT", data).await?;

    expect_json(
        app.post_json(&format!("/api/templates/{popular}/clone"), &json!({}), Some(&token))
            .await?,
        StatusCode::CREATED,
    )
    .await?;

    let safety = expect_json(
        app.get("/api/templates?category=safety", Some(&token)).await?,
        StatusCode::OK,
    )
    .await?;
    let titles: Vec<&str> = safety
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Zulu Audit", "Alpha Audit"]);

    let missing = app
        .post_json(
            "/api/templates/00000000-0000-0000-0000-000000000000/clone",
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn only_admins_add_to_the_catalog() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::try_new().await? else {
        return Ok(());
    };

    let (_, supervisor) = app.user_with_token("sue@acme.test", "SUPERVISOR", None).await?;
    let (_, admin) = app.user_with_token("root@gensheet.test", "ADMIN", None).await?;
    let payload = json!({
        "title": "Ladder Inspection",
        "category": "safety",
        "template_data": {"checkpoints": [
            {"title": "Rungs intact", "field_type": "CHECKBOX", "is_required": true}
        ]}
    });

    let response = app.post_json("/api/templates", &payload, Some(&supervisor)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let created = expect_json(
        app.post_json("/api/templates", &payload, Some(&admin)).await?,
        StatusCode::CREATED,
    )
    .await?;
    assert_eq!(created["is_public"], true);
    assert_eq!(created["usage_count"], 0);
    assert_eq!(created["checkpoint_count"], 1);

    let invalid = app
        .post_json(
            "/api/templates",
            &json!({
                "title": "Broken",
                "category": "safety",
                "template_data": {"checkpoints": [{"title": "Smell", "field_type": "ODOR"}]}
            }),
            Some(&admin),
        )
        .await?;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    app.cleanup().await?;
    Ok(())
}
