use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use uuid::Uuid;

use crate::config::Config;
use crate::roles::Role;

#[derive(Debug, Clone, Serialize)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Outgoing-mail capability. One implementation is constructed when a
/// workspace is selected and injected into the handlers; tests substitute
/// recording or failing implementations through the same trait. A send
/// failure never fails the business operation that triggered it.
pub trait Mailer: Send {
    fn send(&self, email: &OutboundEmail) -> anyhow::Result<()>;
}

/// Spools each message as a JSON file under `<workspace>/outbox/`.
/// Handing the spool to a real MTA is an operator concern.
pub struct FileOutboxMailer {
    outbox: PathBuf,
    from: String,
}

impl FileOutboxMailer {
    pub fn new(outbox: PathBuf, from: String) -> FileOutboxMailer {
        FileOutboxMailer { outbox, from }
    }
}

impl Mailer for FileOutboxMailer {
    fn send(&self, email: &OutboundEmail) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.outbox).with_context(|| {
            format!("failed to create outbox {}", self.outbox.to_string_lossy())
        })?;
        let queued_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let name = format!(
            "{}-{}.json",
            chrono::Utc::now().format("%Y%m%d%H%M%S"),
            Uuid::new_v4().simple()
        );
        let path = self.outbox.join(name);
        let body = json!({
            "from": self.from,
            "to": email.to,
            "subject": email.subject,
            "html": email.html,
            "text": email.text,
            "queuedAt": queued_at,
        });
        std::fs::write(&path, serde_json::to_string_pretty(&body)?)
            .with_context(|| format!("failed to write {}", path.to_string_lossy()))?;
        Ok(())
    }
}

/// Discards everything. In place until a workspace is selected.
pub struct NullMailer;

impl Mailer for NullMailer {
    fn send(&self, _email: &OutboundEmail) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Account facts rendered into the welcome templates. Optional fields are
/// simply left out of the message.
pub struct WelcomeDetails<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub code: &'a str,
    pub roll_no: Option<&'a str>,
    pub mobile: Option<&'a str>,
    pub faculty: Option<&'a str>,
    pub department: Option<&'a str>,
    pub stream: Option<&'a str>,
}

pub fn welcome_email(
    cfg: &Config,
    role: Role,
    details: &WelcomeDetails,
    reset_token: &str,
) -> OutboundEmail {
    let link = cfg.reset_link(reset_token);
    let code_label = match role {
        Role::Teacher => "Teacher Code",
        _ => "Student Code",
    };

    let mut facts: Vec<(String, String)> = vec![
        (code_label.to_string(), details.code.to_string()),
        ("Name".to_string(), details.name.to_string()),
        ("Email".to_string(), details.email.to_string()),
    ];
    if let Some(v) = details.roll_no {
        facts.push(("Roll No".to_string(), v.to_string()));
    }
    if let Some(v) = details.mobile {
        facts.push(("Mobile".to_string(), v.to_string()));
    }
    if let Some(v) = details.faculty {
        facts.push(("Faculty".to_string(), v.to_string()));
    }
    if let Some(v) = details.department {
        facts.push(("Department".to_string(), v.to_string()));
    }
    if let Some(v) = details.stream {
        facts.push(("Stream".to_string(), v.to_string()));
    }

    let facts_html: String = facts
        .iter()
        .map(|(k, v)| format!("<p><strong>{}:</strong> {}</p>", k, v))
        .collect();
    let facts_text: String = facts
        .iter()
        .map(|(k, v)| format!("- {}: {}\n", k, v))
        .collect();

    let html = format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">\
           <div style=\"background: #2c3e50; color: white; padding: 20px; text-align: center;\">\
             <h2>{college}</h2><p>{role} Account Registration</p>\
           </div>\
           <div style=\"background: #f8f9fa; padding: 30px; border: 1px solid #e0e0e0;\">\
             <h3>Dear {name},</h3>\
             <p>Your {role_lc} account has been created in the Learning Management System.</p>\
             <div style=\"background: white; border-left: 4px solid #3498db; padding: 15px;\">\
               <h4>Your Account Details:</h4>{facts}\
             </div>\
             <p><strong>This link expires in 30 minutes.</strong></p>\
             <a href=\"{link}\" style=\"display: inline-block; background: #27ae60; color: white; \
                padding: 12px 30px; text-decoration: none; border-radius: 5px;\">Set Your Password</a>\
             <p>If you were not expecting this account, contact the admin office.</p>\
           </div>\
         </div>",
        college = cfg.college_name,
        role = role.label(),
        role_lc = role.as_str(),
        name = details.name,
        facts = facts_html,
        link = link,
    );

    let text = format!(
        "Welcome to {college}!\n\n\
         Dear {name},\n\n\
         Your {role_lc} account has been created:\n{facts}\n\
         To set your password, open: {link}\n\
         (This link expires in 30 minutes.)\n",
        college = cfg.college_name,
        name = details.name,
        role_lc = role.as_str(),
        facts = facts_text,
        link = link,
    );

    OutboundEmail {
        to: details.email.to_string(),
        subject: format!(
            "Welcome to {} - {} Account Registration",
            cfg.college_name,
            role.label()
        ),
        html,
        text,
    }
}

pub fn reset_request_email(
    cfg: &Config,
    role: Role,
    name: &str,
    to: &str,
    reset_token: &str,
) -> OutboundEmail {
    let link = cfg.reset_link(reset_token);
    let html = format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">\
           <div style=\"background: #2c3e50; color: white; padding: 20px; text-align: center;\">\
             <h2>{college}</h2><p>{role} Password Reset</p>\
           </div>\
           <div style=\"background: #f8f9fa; padding: 30px; border: 1px solid #e0e0e0;\">\
             <h3>Dear {name},</h3>\
             <p>You requested a password reset for your {role_lc} account.</p>\
             <a href=\"{link}\" style=\"display: inline-block; background: #3498db; color: white; \
                padding: 12px 24px; text-decoration: none; border-radius: 5px;\">Reset Password</a>\
             <p><strong>This link expires in 2 minutes.</strong></p>\
             <p>If you didn't request this, ignore this email and contact admin immediately.</p>\
           </div>\
         </div>",
        college = cfg.college_name,
        role = role.label(),
        role_lc = role.as_str(),
        name = name,
        link = link,
    );
    let text = format!(
        "Password reset requested for your {role_lc} account.\n\n\
         Reset link (expires in 2 minutes): {link}\n\n\
         If you didn't request this, ignore this email.\n",
        role_lc = role.as_str(),
        link = link,
    );
    OutboundEmail {
        to: to.to_string(),
        subject: format!("Password Reset - {} Account", role.label()),
        html,
        text,
    }
}

pub fn reset_confirmation_email(cfg: &Config, role: Role, name: &str, to: &str) -> OutboundEmail {
    let html = format!(
        "<div style=\"font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto;\">\
           <div style=\"background: #27ae60; color: white; padding: 20px; text-align: center;\">\
             <h2>{college}</h2><p>Password Set Successfully</p>\
           </div>\
           <div style=\"background: #f8f9fa; padding: 30px; border: 1px solid #e0e0e0;\">\
             <h3>Dear {name},</h3>\
             <p>Your password has been set for your {role_lc} account. You can now log in with \
                your email address.</p>\
             <p>If this wasn't you, contact the admin office immediately.</p>\
           </div>\
         </div>",
        college = cfg.college_name,
        role_lc = role.as_str(),
        name = name,
    );
    let text = format!(
        "Your password was set successfully for your {role_lc} account.\n\
         If this wasn't you, contact the admin office immediately.\n",
        role_lc = role.as_str(),
    );
    OutboundEmail {
        to: to.to_string(),
        subject: format!("Password Set Successfully - {} Account", role.label()),
        html,
        text,
    }
}
