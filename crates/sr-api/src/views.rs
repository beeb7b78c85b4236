//! Server-rendered pages. Every value that came from a user or the store
//! goes through [`escape`].

use std::fmt::Write;

use axum::http::StatusCode;
use chrono::{DateTime, NaiveDate, Utc};
use sr_common::api::{ArchivedFilter, ReferralFilter};
use sr_common::identity::VerifiedIdentity;
use sr_common::policy::{LEAD_TEACHER_BONUS, LEAD_TEACHER_POSITION_TYPE, STANDARD_BONUS};
use sr_common::reporting::{DashboardStats, ReferrerSummary, WeeklySummary};
use sr_common::status::StatusTone;
use sr_common::submission::SubmitReferralRequest;
use sr_common::{Referral, ReferralStatus};

const STYLE: &str = "body{font-family:system-ui,sans-serif;max-width:960px;margin:2rem auto;padding:0 1rem;color:#1f2933}\
table{border-collapse:collapse;width:100%}th,td{text-align:left;padding:.4rem;border-bottom:1px solid #e4e7eb}\
label{display:block;margin-top:.75rem}input,select,textarea{width:100%;padding:.4rem}\
.error{color:#b91c1c}.badge{padding:.1rem .5rem;border-radius:.75rem;font-size:.85rem}\
.open{background:#e0f2fe}.positive{background:#dcfce7}.closed{background:#f3f4f6}\
nav a{margin-right:1rem}.cards{display:flex;gap:1rem;flex-wrap:wrap}.card{border:1px solid #e4e7eb;padding:.75rem;border-radius:.5rem}";

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!doctype html><html lang=\"en\"><head><meta charset=\"utf-8\">\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
<title>{title} | Staff Referrals</title><style>{STYLE}</style></head>\
<body><nav><a href=\"/\">Refer someone</a><a href=\"/lookup\">My referrals</a><a href=\"/admin\">Admin</a></nav>\
{body}</body></html>",
        title = escape(title),
    )
}

fn admin_layout(title: &str, admin: &VerifiedIdentity, body: &str) -> String {
    let header = format!(
        "<p>Signed in as {} &middot; <a href=\"/admin/referrals\">All referrals</a> &middot; <a href=\"/logout\">Sign out</a></p>",
        escape(&admin.email)
    );
    layout(title, &format!("{header}{body}"))
}

fn status_badge(status: ReferralStatus) -> String {
    let class = match status.tone() {
        StatusTone::Open => "open",
        StatusTone::Positive => "positive",
        StatusTone::Closed => "closed",
    };
    format!("<span class=\"badge {class}\">{}</span>", status.label())
}

fn date_cell(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_default()
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn text_input(name: &str, label: &str, value: &str, kind: &str, required: bool) -> String {
    format!(
        "<label for=\"{name}\">{label}</label><input id=\"{name}\" name=\"{name}\" type=\"{kind}\" value=\"{value}\"{required}>",
        value = escape(value),
        required = if required { " required" } else { "" },
    )
}

pub fn submission_form(values: &SubmitReferralRequest, error: Option<&str>) -> String {
    let mut body = String::from("<h1>Refer a candidate</h1>");
    let _ = write!(
        body,
        "<p>Referral bonus: ${LEAD_TEACHER_BONUS} for {LEAD_TEACHER_POSITION_TYPE} hires, ${STANDARD_BONUS} for every other role, paid after the hire completes 60 days.</p>"
    );
    if let Some(error) = error {
        let _ = write!(body, "<p class=\"error\">{}</p>", escape(error));
    }

    body.push_str("<form method=\"post\" action=\"/referrals\"><h2>About you</h2>");
    body.push_str(&text_input("referrer_name", "Your name", &values.referrer_name, "text", true));
    body.push_str(&text_input("referrer_email", "Your email", &values.referrer_email, "email", true));
    body.push_str(&text_input("referrer_school", "Your school", &values.referrer_school, "text", true));
    body.push_str("<h2>About the candidate</h2>");
    body.push_str(&text_input("candidate_name", "Candidate name", &values.candidate_name, "text", true));
    body.push_str(&text_input("candidate_email", "Candidate email", &values.candidate_email, "email", true));
    body.push_str(&text_input("candidate_phone", "Candidate phone", &values.candidate_phone, "tel", false));
    body.push_str(&text_input("position", "Position", &values.position, "text", true));

    let lead_selected = values.position_type == LEAD_TEACHER_POSITION_TYPE;
    let _ = write!(
        body,
        "<label for=\"position_type\">Position type</label><select id=\"position_type\" name=\"position_type\" required>\
<option value=\"{LEAD_TEACHER_POSITION_TYPE}\"{}>{LEAD_TEACHER_POSITION_TYPE}</option>\
<option value=\"Other\"{}>Other</option></select>",
        if lead_selected { " selected" } else { "" },
        if lead_selected { "" } else { " selected" },
    );

    body.push_str(&text_input("role_fit", "Why they fit the role", &values.role_fit, "text", false));
    body.push_str(&text_input("relationship", "How you know them", &values.relationship, "text", true));
    body.push_str(&text_input("already_applied", "Have they applied yet?", &values.already_applied, "text", false));
    let _ = write!(
        body,
        "<label for=\"notes\">Notes</label><textarea id=\"notes\" name=\"notes\">{}</textarea>\
<p><button type=\"submit\">Submit referral</button></p></form>",
        escape(&values.notes)
    );

    layout("Refer a candidate", &body)
}

pub fn submission_confirmation(referral: &Referral) -> String {
    let body = format!(
        "<h1>Thank you!</h1><p>Your referral of {candidate} was received.</p>\
<p>Referral ID: <strong>{id}</strong></p><p>Potential bonus: <strong>${bonus}</strong></p>\
<p>Keep the ID to <a href=\"/lookup?q={id}\">check its status</a> later.</p>",
        candidate = escape(&referral.candidate_name),
        id = escape(referral.referral_id.as_str()),
        bonus = referral.bonus_amount,
    );
    layout("Referral received", &body)
}

pub fn lookup_page(query: &str, summary: Option<&ReferrerSummary<'_>>) -> String {
    let mut body = format!(
        "<h1>Check a referral</h1><form method=\"get\" action=\"/lookup\">\
<label for=\"q\">Referral ID or your email</label><input id=\"q\" name=\"q\" value=\"{}\">\
<p><button type=\"submit\">Look up</button></p></form>",
        escape(query)
    );

    match summary {
        None => {}
        Some(summary) if summary.referrals.is_empty() => {
            body.push_str("<p>No referrals found.</p>");
        }
        Some(summary) => {
            let _ = write!(
                body,
                "<p>Pending bonuses: <strong>${}</strong> &middot; Paid: <strong>${}</strong></p>\
<table><thead><tr><th>ID</th><th>Candidate</th><th>Position</th><th>Status</th><th>Bonus</th><th>Payout month</th></tr></thead><tbody>",
                summary.total_pending, summary.total_paid
            );
            for referral in &summary.referrals {
                let _ = write!(
                    body,
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>${}</td><td>{}</td></tr>",
                    escape(referral.referral_id.as_str()),
                    escape(&referral.candidate_name),
                    escape(&referral.position),
                    status_badge(referral.status),
                    referral.bonus_amount,
                    referral
                        .payout_month
                        .map(|month| month.to_string())
                        .unwrap_or_default(),
                );
            }
            body.push_str("</tbody></table>");
        }
    }

    layout("Check a referral", &body)
}

pub fn error_page(status: StatusCode, message: &str) -> String {
    let body = format!(
        "<h1>{}</h1><p class=\"error\">{}</p><p><a href=\"/\">Back to the referral form</a></p>",
        status.canonical_reason().unwrap_or("Error"),
        escape(message)
    );
    layout("Something went wrong", &body)
}

pub fn forbidden_page(email: &str) -> String {
    let body = format!(
        "<h1>Not authorized</h1><p>{} is not on the admin list.</p><p><a href=\"/logout\">Sign out</a></p>",
        escape(email)
    );
    layout("Not authorized", &body)
}

pub fn admin_dashboard(
    admin: &VerifiedIdentity,
    stats: &DashboardStats,
    summary: &WeeklySummary<'_>,
) -> String {
    let mut body = String::from("<h1>Referral dashboard</h1><div class=\"cards\">");
    for (label, value) in [
        ("Total", stats.total.to_string()),
        ("Pending review", stats.pending_review.to_string()),
        ("In progress", stats.in_progress.to_string()),
        ("Hired, not yet paid", stats.hired_pending.to_string()),
        ("Paid", stats.paid_count.to_string()),
        ("Closed without payout", stats.not_hired.to_string()),
        ("Bonuses pending", format!("${}", stats.bonuses_pending)),
        ("Bonuses paid", format!("${}", stats.bonuses_paid)),
    ] {
        let _ = write!(
            body,
            "<div class=\"card\"><div>{label}</div><strong>{value}</strong></div>"
        );
    }
    body.push_str("</div><h2>By status</h2><table><tbody>");
    for entry in &stats.by_status {
        let _ = write!(
            body,
            "<tr><td><a href=\"/admin/referrals?status={label}\">{badge}</a></td><td>{count}</td></tr>",
            label = entry.status.label().replace(' ', "+"),
            badge = status_badge(entry.status),
            count = entry.count,
        );
    }
    body.push_str("</tbody></table>");

    let _ = write!(
        body,
        "<h2>This week</h2><p>{} new referrals in the last 7 days.</p>",
        summary.new_this_week.len()
    );
    for (heading, referrals) in [
        ("Needs review", &summary.needs_review),
        ("Eligible within 14 days", &summary.upcoming_eligible),
        ("Ready for payout", &summary.ready_for_payout),
    ] {
        if referrals.is_empty() {
            continue;
        }
        let _ = write!(body, "<h3>{heading} ({})</h3>", referrals.len());
        body.push_str(&referral_table(referrals));
    }
    if summary.ready_for_payout_total > 0 {
        let _ = write!(
            body,
            "<p>Total ready for payout: <strong>${}</strong></p>",
            summary.ready_for_payout_total
        );
    }

    admin_layout("Dashboard", admin, &body)
}

fn referral_table(referrals: &[&Referral]) -> String {
    let mut table = String::from(
        "<table><thead><tr><th>ID</th><th>Submitted</th><th>Candidate</th><th>Referrer</th><th>Position</th><th>Status</th><th>60-day date</th></tr></thead><tbody>",
    );
    for referral in referrals {
        let _ = write!(
            table,
            "<tr><td><a href=\"/admin/referrals/{id}\">{id}</a></td><td>{submitted}</td><td>{candidate}</td><td>{referrer}</td><td>{position}</td><td>{status}</td><td>{sixty}</td></tr>",
            id = escape(referral.referral_id.as_str()),
            submitted = referral.submitted_at.format("%Y-%m-%d"),
            candidate = escape(&referral.candidate_name),
            referrer = escape(&referral.referrer_name),
            position = escape(&referral.position),
            status = status_badge(referral.status),
            sixty = date_cell(referral.sixty_day_date),
        );
    }
    table.push_str("</tbody></table>");
    table
}

pub fn admin_list(
    admin: &VerifiedIdentity,
    filter: &ReferralFilter,
    referrals: &[&Referral],
) -> String {
    let mut body = String::from(
        "<h1>Referrals</h1><form method=\"get\" action=\"/admin/referrals\">\
<label for=\"status\">Status</label><select id=\"status\" name=\"status\"><option value=\"\">All statuses</option>",
    );
    for status in ReferralStatus::ALL {
        let selected = if filter.status == Some(status) { " selected" } else { "" };
        let _ = write!(body, "<option{selected}>{}</option>", status.label());
    }
    body.push_str("</select><label for=\"archived\">Archived</label><select id=\"archived\" name=\"archived\">");
    for (value, label) in [
        (ArchivedFilter::Exclude, "Hide archived"),
        (ArchivedFilter::Include, "Show all"),
        (ArchivedFilter::Only, "Archived only"),
    ] {
        let selected = if filter.archived == value { " selected" } else { "" };
        let _ = write!(
            body,
            "<option value=\"{}\"{selected}>{label}</option>",
            value.as_ref()
        );
    }
    let _ = write!(
        body,
        "</select><p><button type=\"submit\">Filter</button></p></form><p>{} referrals</p>",
        referrals.len()
    );
    body.push_str(&referral_table(referrals));

    admin_layout("Referrals", admin, &body)
}

pub fn admin_detail(admin: &VerifiedIdentity, referral: &Referral, error: Option<&str>) -> String {
    let id = escape(referral.referral_id.as_str());
    let mut body = format!(
        "<h1>Referral {id} {badge}</h1>",
        badge = status_badge(referral.status)
    );
    if let Some(error) = error {
        let _ = write!(body, "<p class=\"error\">{}</p>", escape(error));
    }
    if referral.is_archived {
        body.push_str("<p><em>This referral is archived.</em></p>");
    }

    body.push_str("<table><tbody>");
    let rows: [(&str, String); 20] = [
        ("Submitted", timestamp(referral.submitted_at)),
        ("Referrer", format!("{} &lt;{}&gt;", escape(&referral.referrer_name), escape(&referral.referrer_email))),
        ("School", escape(&referral.referrer_school)),
        ("Candidate", escape(&referral.candidate_name)),
        ("Candidate email", escape(&referral.candidate_email)),
        ("Candidate phone", escape(&referral.candidate_phone)),
        ("Position", escape(&referral.position)),
        ("Position type", escape(&referral.position_type)),
        ("Role fit", escape(&referral.role_fit)),
        ("Relationship", escape(&referral.relationship)),
        ("Already applied", escape(&referral.already_applied)),
        ("Notes", escape(&referral.notes)),
        ("Bonus", format!("${}", referral.bonus_amount)),
        ("Status updated", timestamp(referral.status_updated_at)),
        ("Updated by", escape(&referral.status_updated_by)),
        ("Hire date", date_cell(referral.hire_date)),
        ("60-day date", date_cell(referral.sixty_day_date)),
        ("Payout month", referral.payout_month.map(|m| m.to_string()).unwrap_or_default()),
        ("Paid date", date_cell(referral.paid_date)),
        ("Admin notes", escape(&referral.admin_notes)),
    ];
    for (label, value) in rows {
        let _ = write!(body, "<tr><th>{label}</th><td>{value}</td></tr>");
    }
    body.push_str("</tbody></table>");

    if referral.status.is_absorbing() {
        let _ = write!(
            body,
            "<h2>Change status</h2><p>{} is final; the status can no longer change.</p>",
            referral.status.label()
        );
    } else {
        let _ = write!(
            body,
            "<h2>Change status</h2><form method=\"post\" action=\"/admin/referrals/{id}/status\">\
    <label for=\"status\">New status</label><select id=\"status\" name=\"status\">"
        );
        for status in ReferralStatus::ALL {
            if status == referral.status {
                continue;
            }
            let hint = if referral.status.can_transition_to(status) {
                ""
            } else {
                " (override)"
            };
            let _ = write!(
                body,
                "<option value=\"{label}\">{label}{hint}</option>",
                label = status.label()
            );
        }
        let _ = write!(
            body,
            "</select><label for=\"hire_date\">Hire date (required for Hired)</label>\
    <input id=\"hire_date\" name=\"hire_date\" type=\"date\" value=\"{hire}\">\
    <label for=\"paid_date\">Paid date (required for Paid)</label>\
    <input id=\"paid_date\" name=\"paid_date\" type=\"date\" value=\"{paid}\">\
    <label><input type=\"checkbox\" name=\"override_workflow\" value=\"true\" style=\"width:auto\"> Override the normal workflow</label>\
    <p><button type=\"submit\">Update status</button></p></form>",
            hire = date_cell(referral.hire_date),
            paid = date_cell(referral.paid_date),
        );
    }

    let _ = write!(
        body,
        "<h2>Admin notes</h2><form method=\"post\" action=\"/admin/referrals/{id}/notes\">\
<textarea name=\"admin_notes\" rows=\"4\">{notes}</textarea><p><button type=\"submit\">Save notes</button></p></form>",
        notes = escape(&referral.admin_notes),
    );

    let (action, label) = if referral.is_archived {
        ("unarchive", "Restore from archive")
    } else {
        ("archive", "Archive")
    };
    let _ = write!(
        body,
        "<form method=\"post\" action=\"/admin/referrals/{id}/{action}\"><button type=\"submit\">{label}</button></form>"
    );

    admin_layout(&format!("Referral {}", referral.referral_id), admin, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_neutralises_markup() {
        assert_eq!(
            escape("<script>alert(\"x\" & 'y')</script>"),
            "&lt;script&gt;alert(&quot;x&quot; &amp; &#39;y&#39;)&lt;/script&gt;"
        );
    }

    #[test]
    fn form_keeps_entered_values_and_shows_error() {
        let values = SubmitReferralRequest {
            candidate_name: "Sam <Ortiz>".into(),
            position_type: LEAD_TEACHER_POSITION_TYPE.into(),
            ..Default::default()
        };

        let html = submission_form(&values, Some("candidate_email: is required"));
        assert!(html.contains("value=\"Sam &lt;Ortiz&gt;\""));
        assert!(html.contains("candidate_email: is required"));
        assert!(html.contains("<option value=\"Lead Teacher\" selected>"));
    }

    #[test]
    fn detail_offers_status_changes_only_while_open() {
        let admin = VerifiedIdentity {
            email: "talent@school.org".into(),
            name: None,
        };
        let mut referral = SubmitReferralRequest {
            candidate_name: "Sam Ortiz".into(),
            position_type: "Other".into(),
            ..Default::default()
        }
        .into_referral(sr_common::ReferralId::generate(), Utc::now());

        let open = admin_detail(&admin, &referral, None);
        assert!(open.contains("/status\""));
        assert!(open.contains("<option value=\"Under Review\">Under Review</option>"));
        assert!(open.contains("Hired (override)"));

        referral.status = ReferralStatus::Paid;
        let paid = admin_detail(&admin, &referral, None);
        assert!(!paid.contains("/status\""));
        assert!(paid.contains("Paid is final"));
    }
}
