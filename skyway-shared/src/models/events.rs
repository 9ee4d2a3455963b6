use serde::{Deserialize, Serialize};

/// Messages handed to the out-of-process notification worker. Only row
/// identifiers travel; the worker loads whatever it needs to render the email.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationTask {
    WelcomeEmail { user_id: i64 },
    FlightReminder { reservation_id: i64 },
    FlightRequestReminder { request_id: i64 },
}

impl NotificationTask {
    /// Partition key used by the queue so that tasks for the same row stay ordered.
    pub fn key(&self) -> String {
        match self {
            NotificationTask::WelcomeEmail { user_id } => format!("user:{}", user_id),
            NotificationTask::FlightReminder { reservation_id } => {
                format!("reservation:{}", reservation_id)
            }
            NotificationTask::FlightRequestReminder { request_id } => {
                format!("flight_request:{}", request_id)
            }
        }
    }
}

/// Envelope published on the notifications topic.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationEnvelope {
    #[serde(flatten)]
    pub task: NotificationTask,
    pub enqueued_at: i64,
}

impl NotificationEnvelope {
    pub fn now(task: NotificationTask) -> Self {
        Self {
            task,
            enqueued_at: chrono::Utc::now().timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_is_flat_json() {
        let envelope = NotificationEnvelope {
            task: NotificationTask::FlightReminder { reservation_id: 7 },
            enqueued_at: 1_700_000_000,
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "flight_reminder");
        assert_eq!(value["reservation_id"], 7);
        assert_eq!(value["enqueued_at"], 1_700_000_000i64);
    }

    #[test]
    fn keys_group_by_row() {
        assert_eq!(NotificationTask::WelcomeEmail { user_id: 3 }.key(), "user:3");
        assert_eq!(
            NotificationTask::FlightRequestReminder { request_id: 9 }.key(),
            "flight_request:9"
        );
    }
}
