//! Phase 1: every declared target must be reachable.

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{BugCollector, Check, CheckContext};
use crate::domain::{Severity, TestResult};

pub struct ConnectivityCheck;

#[async_trait]
impl Check for ConnectivityCheck {
    fn name(&self) -> &str {
        "connectivity"
    }

    async fn run(&self, cx: &CheckContext<'_>) -> TestResult {
        let exercise = cx.exercise;
        let mut c = BugCollector::new(self.name(), &exercise.id);

        if exercise.targets.is_empty() {
            c.push(
                c.bug(Severity::P2, "exercise declares no targets")
                    .with_fix("Declare the lab machines the exercise runs on"),
            );
            return c.finish();
        }

        let mut classes = Map::new();
        for target in &exercise.targets {
            match cx.pool.acquire(target).await {
                Ok(conn) => {
                    classes.insert(
                        target.name.clone(),
                        Value::from(conn.device_class().as_str()),
                    );
                }
                Err(e) => {
                    let bug = c
                        .bug(Severity::P0, format!("target {} is unreachable", target.name))
                        .with_fix("Verify the lab environment is provisioned and reachable")
                        .with_evidence(e.to_string())
                        .with_verification_step(format!("Connect to {} manually", target.address()));
                    c.block(bug);
                    break;
                }
            }
        }
        c.detail("device_classes", Value::Object(classes));
        c.finish()
    }
}
