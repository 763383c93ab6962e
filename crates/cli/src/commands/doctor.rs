use operator_core::config::{AppConfig, LoadOptions};
use operator_db::connect_from_config;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_system_prompt(&config));
            checks.push(check_llm_provider(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["system_prompt", "llm_provider", "database_connectivity", "schema"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_system_prompt(config: &AppConfig) -> DoctorCheck {
    match config.agent.load_system_prompt() {
        Ok(prompt) => DoctorCheck {
            name: "system_prompt",
            status: CheckStatus::Pass,
            details: match &config.agent.system_prompt_path {
                Some(path) => format!("{} characters from {}", prompt.len(), path.display()),
                None => "using the built-in prompt".to_string(),
            },
        },
        Err(error) => {
            DoctorCheck {
                name: "system_prompt",
                status: CheckStatus::Fail,
                details: error.to_string(),
            }
        }
    }
}

fn check_llm_provider(config: &AppConfig) -> DoctorCheck {
    let endpoint = config.llm.base_url.as_deref().unwrap_or("https://api.openai.com/v1");
    DoctorCheck {
        name: "llm_provider",
        status: CheckStatus::Pass,
        details: format!(
            "{} model `{}` at {endpoint} (credentials validated by config contract)",
            config.llm.provider, config.llm.model
        ),
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    DoctorCheck {
                        name: "schema",
                        status: CheckStatus::Skipped,
                        details: "skipped because the database is unreachable".to_string(),
                    },
                ];
            }
        };

        let tables: Result<i64, _> = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' \
             AND name IN ('checkpoints', 'user_profiles', 'salesforce_credentials')",
        )
        .fetch_one(&pool)
        .await;
        pool.close().await;

        let schema = match tables {
            Ok(3) => DoctorCheck {
                name: "schema",
                status: CheckStatus::Pass,
                details: "baseline tables present".to_string(),
            },
            Ok(found) => DoctorCheck {
                name: "schema",
                status: CheckStatus::Fail,
                details: format!("{found} of 3 baseline tables present; run `operator migrate`"),
            },
            Err(error) => {
                DoctorCheck { name: "schema", status: CheckStatus::Fail, details: error.to_string() }
            }
        };

        vec![
            DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            },
            schema,
        ]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
