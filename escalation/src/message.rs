//! Outbound message composition.

use serde::{Deserialize, Serialize};

use crate::model::{Alert, Notification};

/// How pressing a dispatch is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// First notice to the primary caregiver.
    Notice,
    /// Follow-up to the primary caregiver after the first wait elapsed.
    Reminder,
    /// Escalated request to a tier 1–3 caregiver.
    AssistanceRequest,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Notice => write!(f, "notice"),
            Self::Reminder => write!(f, "reminder"),
            Self::AssistanceRequest => write!(f, "assistance_request"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Recipient email address
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub confirm_link: String,
}

#[derive(Debug, Clone)]
pub struct MessageComposer {
    confirm_base_url: String,
}

impl MessageComposer {
    pub fn new(confirm_base_url: impl Into<String>) -> Self {
        Self {
            confirm_base_url: confirm_base_url.into(),
        }
    }

    pub fn confirm_link(&self, notification: &Notification) -> String {
        format!("{}?token={}", self.confirm_base_url, notification.token)
    }

    pub fn compose(&self, notification: &Notification, alert: &Alert, urgency: Urgency) -> Message {
        let caregiver = &notification.assignment.caregiver;
        let elderly = notification.assignment.elderly.full_name();
        let level = notification.tier().level();
        let link = self.confirm_link(notification);

        let subject = match urgency {
            Urgency::Notice => format!("Alert at home: {} ({})", alert.subject, alert.location),
            Urgency::Reminder => format!(
                "REMINDER: {} alert still unacknowledged ({})",
                alert.subject, alert.location
            ),
            Urgency::AssistanceRequest => format!(
                "Assistance requested for {elderly} - caregiver level {level}"
            ),
        };

        let opening = match urgency {
            Urgency::Notice => "A sensor in your home reported a possible hazard.".to_string(),
            Urgency::Reminder => {
                "The alert below has not been acknowledged yet. Please check it now.".to_string()
            }
            Urgency::AssistanceRequest => format!(
                "We request your assistance for {elderly} as a level {level} caregiver."
            ),
        };

        let body = format!(
            "Dear {},\n\n{}\n\n\
             Subject: {}\n\
             Start: {}\n\
             Location: {}\n\
             State: {}\n\
             Measurable: {}\n\n\
             Please open the following link to confirm that you received this \
             notification and are taking care of it:\n\n{}\n",
            caregiver.full_name(),
            opening,
            alert.subject,
            alert.start.to_rfc3339(),
            alert.location,
            alert.state,
            alert.measurable,
            link,
        );

        Message {
            recipient: caregiver.email.clone(),
            subject,
            body,
            confirm_link: link,
        }
    }
}
