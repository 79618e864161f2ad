//! Test helpers for gentax-service integration tests.
//!
//! Spawns the real application on a random port with a mock provider, a
//! temporary knowledge base and a temporary sessions file.

#![allow(dead_code)]

use gentax_service::config::GentaxConfig;
use gentax_service::services::providers::mock::{MockBehavior, MockChatProvider};
use gentax_service::startup::Application;
use service_core::config::Config;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestApp {
    pub address: String,
    pub provider: Arc<MockChatProvider>,
    pub sessions_file: PathBuf,
    pub static_dir: PathBuf,
    _dir: TempDir,
}

pub struct TestAppOptions {
    pub behavior: MockBehavior,
    pub with_index_html: bool,
    pub chat_rate_limit_per_min: u32,
}

impl Default for TestAppOptions {
    fn default() -> Self {
        Self {
            behavior: MockBehavior::Echo,
            with_index_html: true,
            chat_rate_limit_per_min: 0,
        }
    }
}

impl TestApp {
    pub async fn spawn() -> TestApp {
        Self::spawn_with(TestAppOptions::default()).await
    }

    pub async fn spawn_with(options: TestAppOptions) -> TestApp {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let knowledge_dir = dir.path().join("knowledge");
        let static_dir = dir.path().join("static");
        let sessions_file = dir.path().join("sessions.json");

        std::fs::create_dir_all(&knowledge_dir).expect("Failed to create knowledge dir");
        std::fs::create_dir_all(&static_dir).expect("Failed to create static dir");
        std::fs::write(
            knowledge_dir.join("income_tax.md"),
            "Section 80C allows a deduction of up to Rs 1.5 lakh for PPF and ELSS investments.\n\n\
             The new tax regime does not allow most Chapter VI-A deductions.",
        )
        .expect("Failed to write knowledge file");
        std::fs::write(
            knowledge_dir.join("gst.jsonl"),
            serde_json::json!({
                "source": "GST Act s.22",
                "chunk_id": "s22",
                "text": "Registration is required when aggregate turnover \
                         exceeds twenty lakh rupees.",
            })
            .to_string(),
        )
        .expect("Failed to write knowledge file");

        if options.with_index_html {
            std::fs::write(
                static_dir.join("index.html"),
                "<!doctype html><title>GenTaxAI</title><div id=\"chat\"></div>",
            )
            .expect("Failed to write index.html");
        }
        std::fs::write(static_dir.join("app.js"), "console.log('gentax');")
            .expect("Failed to write app.js");

        let mut vars = HashMap::new();
        vars.insert("GROQ_API_KEY", "gsk_test".to_string());
        vars.insert("SESSIONS_FILE", sessions_file.display().to_string());
        vars.insert("STATIC_DIR", static_dir.display().to_string());
        vars.insert("KNOWLEDGE_DIR", knowledge_dir.display().to_string());
        vars.insert(
            "CHAT_RATE_LIMIT_PER_MIN",
            options.chat_rate_limit_per_min.to_string(),
        );

        let common = Config {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
        };
        let config = GentaxConfig::from_lookup(common, |key| vars.get(key).cloned())
            .expect("Failed to build config");

        let provider = Arc::new(MockChatProvider::new(options.behavior));
        let app = Application::build_with_provider(config, provider.clone())
            .await
            .expect("Failed to build application");
        let address = format!("http://127.0.0.1:{}", app.port());

        tokio::spawn(async move {
            let _ = app.run_until_stopped().await;
        });

        TestApp {
            address,
            provider,
            sessions_file,
            static_dir,
            _dir: dir,
        }
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build client")
    }

    pub async fn post_chat(&self, body: serde_json::Value) -> reqwest::Response {
        self.client()
            .post(format!("{}/api/chat", self.address))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }
}
