use anyhow::Result;

use sentra_storage::{Store, TEMPLATE_TYPE_MATCH_RULE, TEMPLATE_TYPE_TRIGGER_RULE};

struct Seed {
    name: &'static str,
    description: &'static str,
    content: &'static str,
    template_type: &'static str,
}

/// Expression snippets offered by the rule editor. Existing names are left
/// alone, so operator edits survive restarts.
const PREDEFINED: &[Seed] = &[
    Seed {
        name: "match by origin",
        description: "origin is logstash",
        content: r#"Origin == "logstash""#,
        template_type: TEMPLATE_TYPE_MATCH_RULE,
    },
    Seed {
        name: "match meta value",
        description: "log type is nginx_access",
        content: r#"Meta["log_type"] == "nginx_access""#,
        template_type: TEMPLATE_TYPE_MATCH_RULE,
    },
    Seed {
        name: "match meta in set",
        description: "log level is ERROR or FATAL",
        content: r#"Upper(Meta["log_level"]) in ["ERROR", "FATAL"]"#,
        template_type: TEMPLATE_TYPE_MATCH_RULE,
    },
    Seed {
        name: "match meta not in set",
        description: "log level is neither DEBUG nor INFO",
        content: r#"Meta["log_level"] not in ["DEBUG", "INFO"]"#,
        template_type: TEMPLATE_TYPE_MATCH_RULE,
    },
    Seed {
        name: "match by tag",
        description: "carries the java tag",
        content: r#""java" in Tags"#,
        template_type: TEMPLATE_TYPE_MATCH_RULE,
    },
    Seed {
        name: "match content regex",
        description: "content starts with Error:",
        content: r#"Content matches "^Error:""#,
        template_type: TEMPLATE_TYPE_MATCH_RULE,
    },
    Seed {
        name: "match content without keyword",
        description: "content does not contain the keyword",
        content: r#"not (Content contains "keyword")"#,
        template_type: TEMPLATE_TYPE_MATCH_RULE,
    },
    Seed {
        name: "match json field",
        description: "status field inside the JSON content",
        content: r#"JsonGet("status", "0") == "500""#,
        template_type: TEMPLATE_TYPE_MATCH_RULE,
    },
    Seed {
        name: "limit fires per window",
        description: "fewer than 5 failed fires in 30 minutes",
        content: r#"TriggeredTimesInPeriod(30, "failed") < 5"#,
        template_type: TEMPLATE_TYPE_TRIGGER_RULE,
    },
    Seed {
        name: "night window only",
        description: "between 22:00 and 09:00",
        content: r#"DailyTimeBetween("22:00", "09:00")"#,
        template_type: TEMPLATE_TYPE_TRIGGER_RULE,
    },
    Seed {
        name: "minimum group size",
        description: "at least 10 events in the group",
        content: "MessagesCount() >= 10",
        template_type: TEMPLATE_TYPE_TRIGGER_RULE,
    },
];

/// Seed predefined expression templates (config `migrate = true`).
pub async fn seed_templates(store: &Store) -> Result<()> {
    let mut created = 0u32;
    let mut skipped = 0u32;

    for seed in PREDEFINED {
        if store
            .insert_template_if_absent(
                seed.name,
                seed.description,
                seed.content,
                seed.template_type,
            )
            .await?
        {
            created += 1;
        } else {
            skipped += 1;
        }
    }

    tracing::info!(created, skipped, "template seeding completed");
    Ok(())
}
