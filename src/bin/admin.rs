use std::env;

use anyhow::{anyhow, bail, Context, Result};
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use gensheet::{
    access::{Principal, Role},
    auth::password,
    config::AppConfig,
    db,
    models::{NewBestPracticeTemplate, NewOrganization, NewUser, User},
    schema::{best_practice_templates, checksheets, organizations, users},
    status::ChecksheetStatus,
    store::{self, CheckpointInput, ChecksheetDraft},
    MIGRATIONS,
};

const USAGE: &str = "Usage: admin <seed | hash-password <password>>";
const SAMPLE_ORGANIZATION: &str = "GenSheet Demo";
const SAMPLE_CHECKSHEET: &str = "Daily Safety Inspection";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("seed") => seed(),
        Some("hash-password") => {
            let plain = args.next().ok_or_else(|| anyhow!(USAGE))?;
            println!("{}", password::hash_password(&plain)?);
            Ok(())
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }
}

fn seed() -> Result<()> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "admin",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let mut conn = pool.get().context("failed to get database connection")?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow!("failed to run migrations: {err}"))?;

    conn.transaction::<_, anyhow::Error, _>(|conn| {
        let organization_id = ensure_organization(conn)?;
        let admin = ensure_user(
            conn,
            "admin@gensheet.com",
            "Admin User",
            "admin123",
            Role::Admin,
            organization_id,
        )?;
        ensure_user(
            conn,
            "inspector@gensheet.com",
            "Inspector User",
            "inspector123",
            Role::Inspector,
            organization_id,
        )?;
        ensure_sample_checksheet(conn, &admin)?;
        ensure_templates(conn)?;
        Ok(())
    })?;

    println!("Seed completed.");
    println!("  Admin:     admin@gensheet.com / admin123");
    println!("  Inspector: inspector@gensheet.com / inspector123");
    Ok(())
}

fn ensure_organization(conn: &mut PgConnection) -> Result<Uuid> {
    let existing: Option<Uuid> = organizations::table
        .filter(organizations::name.eq(SAMPLE_ORGANIZATION))
        .select(organizations::id)
        .first(conn)
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let organization = NewOrganization {
        id: Uuid::new_v4(),
        name: SAMPLE_ORGANIZATION.to_string(),
    };
    diesel::insert_into(organizations::table)
        .values(&organization)
        .execute(conn)?;
    println!("Created organization {SAMPLE_ORGANIZATION}");
    Ok(organization.id)
}

fn ensure_user(
    conn: &mut PgConnection,
    email: &str,
    name: &str,
    plain_password: &str,
    role: Role,
    organization_id: Uuid,
) -> Result<User> {
    let existing: Option<User> = users::table
        .filter(users::email.eq(email))
        .first(conn)
        .optional()?;
    if let Some(user) = existing {
        println!("User {email} already exists");
        return Ok(user);
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email: email.to_string(),
        name: Some(name.to_string()),
        password_hash: password::hash_password(plain_password)?,
        role: role.as_str().to_string(),
        organization_id: Some(organization_id),
    };
    diesel::insert_into(users::table)
        .values(&new_user)
        .execute(conn)?;
    println!("Created {role} {email}");
    Ok(users::table.find(new_user.id).first(conn)?)
}

fn ensure_sample_checksheet(conn: &mut PgConnection, admin: &User) -> Result<()> {
    let exists: i64 = checksheets::table
        .filter(checksheets::title.eq(SAMPLE_CHECKSHEET))
        .filter(checksheets::creator_id.eq(admin.id))
        .count()
        .get_result(conn)?;
    if exists > 0 {
        println!("Sample checksheet already exists");
        return Ok(());
    }

    let inputs: Vec<CheckpointInput> = serde_json::from_value(json!([
        {
            "title": "Emergency exits are clear and accessible",
            "description": "Verify all emergency exits are unobstructed",
            "field_type": "CHECKBOX",
            "is_required": true,
            "section": "Emergency Preparedness"
        },
        {
            "title": "Fire extinguisher inspection",
            "description": "Check pressure gauge and seal",
            "field_type": "DROPDOWN",
            "is_required": true,
            "section": "Emergency Preparedness",
            "config": {"options": ["OK", "Needs Attention", "Not OK"]}
        },
        {
            "title": "Temperature reading",
            "description": "Record warehouse temperature",
            "field_type": "NUMBER",
            "is_required": true,
            "section": "Environmental",
            "config": {"min": -20, "max": 50, "unit": "°C"}
        },
        {
            "title": "Lighting condition photo",
            "description": "Take photo of lighting conditions",
            "field_type": "PHOTO",
            "is_required": false,
            "section": "Environmental"
        },
        {
            "title": "PPE compliance check",
            "description": "All workers wearing required PPE",
            "field_type": "CHECKBOX",
            "is_required": true,
            "section": "Personnel Safety"
        },
        {
            "title": "Additional notes",
            "description": "Any additional observations",
            "field_type": "TEXTAREA",
            "is_required": false,
            "section": "General"
        }
    ]))?;
    let drafts = store::validate_checkpoints(inputs).map_err(|errors| {
        anyhow!(
            "sample checkpoints are invalid: {}",
            errors
                .iter()
                .map(|err| format!("{}: {}", err.field, err.message))
                .collect::<Vec<_>>()
                .join(", ")
        )
    })?;

    let role: Role = admin.role.parse().map_err(|err: String| anyhow!(err))?;
    let owner = Principal {
        user_id: admin.id,
        role,
        organization_id: admin.organization_id,
    };
    let draft = ChecksheetDraft {
        title: SAMPLE_CHECKSHEET.to_string(),
        description: Some("Standard daily safety checksheet for warehouse operations".to_string()),
        category: Some("safety".to_string()),
        industry: Some("manufacturing".to_string()),
        is_template: false,
        tags: vec!["safety".to_string(), "warehouse".to_string()],
    };
    let (checksheet, checkpoints) = store::create_checksheet(conn, &owner, draft, &drafts)?;
    diesel::update(checksheets::table.find(checksheet.id))
        .set(checksheets::status.eq(ChecksheetStatus::Active.as_str()))
        .execute(conn)?;

    println!(
        "Created checksheet {} with {} checkpoints",
        checksheet.title,
        checkpoints.len()
    );
    Ok(())
}

fn ensure_templates(conn: &mut PgConnection) -> Result<()> {
    for (title, description, category, industry, data) in catalog() {
        let exists: i64 = best_practice_templates::table
            .filter(best_practice_templates::title.eq(title))
            .count()
            .get_result(conn)?;
        if exists > 0 {
            continue;
        }

        let parsed = store::TemplateData::parse(&data).and_then(|parsed| parsed.drafts());
        if let Err(message) = parsed {
            bail!("template {title} is invalid: {message}");
        }

        let template = NewBestPracticeTemplate {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: Some(description.to_string()),
            category: category.to_string(),
            industry: Some(industry.to_string()),
            template_data: data,
            is_public: true,
        };
        diesel::insert_into(best_practice_templates::table)
            .values(&template)
            .execute(conn)?;
        println!("Created template {title}");
    }
    Ok(())
}

fn catalog() -> Vec<(&'static str, &'static str, &'static str, &'static str, Value)> {
    vec![
        (
            "Forklift Pre-Use Check",
            "Operator check before the first shift of the day",
            "safety",
            "logistics",
            json!({"checkpoints": [
                {"title": "Forks free of cracks and bends", "field_type": "CHECKBOX", "is_required": true, "section": "Structure"},
                {"title": "Hydraulic fluid level", "field_type": "DROPDOWN", "is_required": true, "section": "Fluids",
                 "config": {"options": ["Full", "Low", "Leaking"]}},
                {"title": "Horn and lights working", "field_type": "CHECKBOX", "is_required": true, "section": "Controls"},
                {"title": "Hour meter reading", "field_type": "NUMBER", "section": "Controls", "config": {"min": 0}},
                {"title": "Defect photo", "field_type": "PHOTO"},
                {"title": "Operator signature", "field_type": "SIGNATURE", "is_required": true}
            ]}),
        ),
        (
            "Kitchen Hygiene Audit",
            "Food safety audit for commercial kitchens",
            "food-safety",
            "hospitality",
            json!({"checkpoints": [
                {"title": "Fridge temperature", "field_type": "NUMBER", "is_required": true, "section": "Cold Chain",
                 "config": {"min": -5, "max": 8, "unit": "°C"}},
                {"title": "Hand wash stations stocked", "field_type": "CHECKBOX", "is_required": true, "section": "Personal Hygiene"},
                {"title": "Allergen labelling", "field_type": "RATING", "section": "Labelling", "config": {"max": 5}},
                {"title": "Pest control evidence", "field_type": "MULTISELECT", "section": "Premises",
                 "config": {"options": ["None", "Droppings", "Gnaw marks", "Insects"]}},
                {"title": "Observations"}
            ]}),
        ),
        (
            "Server Room Walkthrough",
            "Monthly physical check of IT infrastructure",
            "IT",
            "technology",
            json!({"checkpoints": [
                {"title": "Ambient temperature", "field_type": "NUMBER", "is_required": true, "config": {"min": 10, "max": 35, "unit": "°C"}},
                {"title": "UPS status", "field_type": "DROPDOWN", "is_required": true, "config": {"options": ["Online", "On battery", "Fault"]}},
                {"title": "Cable management acceptable", "field_type": "CHECKBOX"},
                {"title": "Rack photo", "field_type": "PHOTO"}
            ]}),
        ),
    ]
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
