#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tempfile::TempDir;
use uuid::Uuid;

use school_fees_api::app::app;
use school_fees_api::auth::{generate_jwt, Claims, Role};
use school_fees_api::collaborators::{LocalObjectStorage, MemoryArchiveSink, MemoryAuditSink, UrlSigner};
use school_fees_api::config;
use school_fees_api::database::models::{School, SchoolClass, Section, Student};
use school_fees_api::database::MemoryStore;
use school_fees_api::state::AppState;

pub const YEAR: &str = "2025-2026";

/// One API instance on its own port, backed by a fresh in-memory store
pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub store: Arc<MemoryStore>,
    pub archive: Arc<MemoryArchiveSink>,
    pub school_id: Uuid,
    pub class_v: Uuid,
    pub section_v_a: Uuid,
    pub class_vi: Uuid,
    pub section_vi_a: Uuid,
    pub students: Vec<Uuid>,
    _uploads: TempDir,
}

impl TestApp {
    pub async fn spawn() -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let store = Arc::new(MemoryStore::new());
        let archive = Arc::new(MemoryArchiveSink::new());
        let uploads = tempfile::tempdir()?;
        let storage = Arc::new(LocalObjectStorage::new(
            uploads.path(),
            UrlSigner::new(format!("{}/files", base_url), "test-signing-key"),
        ));

        let school_id = Uuid::new_v4();
        store
            .add_school(School {
                id: school_id,
                name: "Greenfield Public School".into(),
                current_academic_year: Some(YEAR.into()),
                created_at: Utc::now(),
            })
            .await;

        let (class_v, section_v_a) = add_class(&store, school_id, "V").await;
        let (class_vi, section_vi_a) = add_class(&store, school_id, "VI").await;

        let mut students = Vec::new();
        for n in 0..6 {
            let id = Uuid::new_v4();
            store
                .add_student(Student {
                    id,
                    school_id,
                    name: format!("Student {}", n + 1),
                    current_class_id: None,
                    current_section_id: None,
                })
                .await;
            students.push(id);
        }

        let cfg = config::config();
        let state = AppState::new(
            store.clone(),
            storage,
            Arc::new(MemoryAuditSink::new()),
            archive.clone(),
            cfg,
        );
        let router = app(state, cfg);
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
            store,
            archive,
            school_id,
            class_v,
            section_v_a,
            class_vi,
            section_vi_a,
            students,
            _uploads: uploads,
        })
    }

    pub fn token(&self, role: Role) -> String {
        generate_jwt(&Claims::new(Uuid::new_v4(), self.school_id, role)).expect("token")
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, role: Role, path: &str) -> Result<(u16, Value)> {
        let res = self
            .client
            .get(self.url(path))
            .bearer_auth(self.token(role))
            .send()
            .await?;
        Ok((res.status().as_u16(), res.json().await?))
    }

    pub async fn send(&self, method: reqwest::Method, role: Role, path: &str, body: Value) -> Result<(u16, Value)> {
        let res = self
            .client
            .request(method, self.url(path))
            .bearer_auth(self.token(role))
            .json(&body)
            .send()
            .await?;
        Ok((res.status().as_u16(), res.json().await?))
    }

    pub async fn post(&self, role: Role, path: &str, body: Value) -> Result<(u16, Value)> {
        self.send(reqwest::Method::POST, role, path, body).await
    }

    /// Class V structure {admission 5000, term 1 3000}; class VI {admission 4000, term 1 4000}
    pub async fn seed_structures(&self) -> Result<()> {
        for (class_id, admission, term) in [(self.class_v, 5000, 3000), (self.class_vi, 4000, 4000)] {
            let (status, body) = self
                .send(
                    reqwest::Method::PUT,
                    Role::Admin,
                    &format!("/api/fee-structures/{}", class_id),
                    json!({ "feeHead": { "admissionFee": admission, "firstTermAmt": term } }),
                )
                .await?;
            anyhow::ensure!(status == 200, "fee structure not saved: {}", body);
        }
        Ok(())
    }

    /// Assign a student to class V section A; returns the record id
    pub async fn enroll(&self, student: Uuid) -> Result<Uuid> {
        let (status, body) = self
            .post(
                Role::Accountant,
                "/api/enrollments",
                json!({ "studentId": student, "classId": self.class_v, "sectionId": self.section_v_a }),
            )
            .await?;
        anyhow::ensure!(status == 200, "assign failed: {}", body);
        Ok(Uuid::parse_str(body["data"]["id"].as_str().context("record id")?)?)
    }

    pub async fn collect_cash(&self, student: Uuid, record: Uuid, amount: i64) -> Result<(u16, Value)> {
        self.post(
            Role::Accountant,
            "/api/fees/collect",
            json!({
                "studentId": student,
                "recordId": record,
                "amountPaid": amount,
                "paymentMode": "cash",
            }),
        )
        .await
    }
}

async fn add_class(store: &MemoryStore, school_id: Uuid, name: &str) -> (Uuid, Uuid) {
    let class = SchoolClass {
        id: Uuid::new_v4(),
        school_id,
        name: name.into(),
    };
    let section = Section {
        id: Uuid::new_v4(),
        school_id,
        class_id: class.id,
        name: "A".into(),
    };
    let ids = (class.id, section.id);
    store.add_class(class).await;
    store.add_section(section).await;
    ids
}

/// Money fields may arrive as JSON strings or numbers
pub fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a money value: {}", other),
    }
}

pub fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

pub fn receipt_no(seq: u32) -> String {
    format!("REC-{}-{:04}", chrono::Datelike::year(&Utc::now()), seq)
}
