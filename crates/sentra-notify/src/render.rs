//! Report rendering for dispatched groups.
//!
//! User templates are plain text with `{{placeholder}}` markers; an empty
//! template falls back to the built-in markdown summary.

use sentra_common::types::{Event, EventGroup};

/// Context fed into a template.
pub struct RenderContext<'a> {
    pub group: &'a EventGroup,
    /// Sample of the group's events (usually a capped fetch, not all).
    pub events: &'a [Event],
    /// Public URL template with `{id}` standing for the group id.
    pub preview_url: &'a str,
}

impl RenderContext<'_> {
    fn preview_link(&self) -> String {
        self.preview_url.replace("{id}", &self.group.id)
    }

    fn messages_block(&self) -> String {
        self.events
            .iter()
            .map(|e| format!("- {}", truncate(&e.content, 360)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Title line used as DingTalk markdown title / email subject.
pub fn render_title(group: &EventGroup) -> String {
    let key = if group.aggregate_key.is_empty() {
        String::new()
    } else {
        format!(" [{}]", group.aggregate_key)
    };
    format!(
        "[sentra] {}{} ({} events)",
        group.rule.name, key, group.event_count
    )
}

/// Render a template, or the built-in summary when the template is empty.
pub fn render(template: &str, ctx: &RenderContext<'_>) -> String {
    if template.trim().is_empty() {
        return render_default(ctx);
    }

    template
        .replace("{{rule_name}}", &ctx.group.rule.name)
        .replace("{{group_id}}", &ctx.group.id)
        .replace("{{aggregate_key}}", &ctx.group.aggregate_key)
        .replace("{{event_count}}", &ctx.group.event_count.to_string())
        .replace("{{type}}", &ctx.group.event_type)
        .replace("{{messages}}", &ctx.messages_block())
        .replace("{{preview_url}}", &ctx.preview_link())
}

fn render_default(ctx: &RenderContext<'_>) -> String {
    let group = ctx.group;
    let key_line = if group.aggregate_key.is_empty() {
        String::new()
    } else {
        format!("\n- **Aggregate key**: {}", group.aggregate_key)
    };
    let preview_line = if ctx.preview_url.is_empty() {
        String::new()
    } else {
        format!("\n\n[view group]({})", ctx.preview_link())
    };

    format!(
        "### {title}\n\n\
         - **Rule**: {rule}{key_line}\n\
         - **Events**: {count}\n\
         - **Window closed**: {ready}\n\n\
         {messages}{preview_line}",
        title = render_title(group),
        rule = group.rule.name,
        key_line = key_line,
        count = group.event_count,
        ready = group.rule.expected_ready_at.to_rfc3339(),
        messages = ctx.messages_block(),
        preview_line = preview_line,
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{cut}...")
}
