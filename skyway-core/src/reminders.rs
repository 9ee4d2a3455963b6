use chrono::{Duration, NaiveDate};
use skyway_shared::NotificationTask;
use tracing::{info, warn};

use crate::notify::TaskQueue;
use crate::repository::{FlightRequestRepository, ReservationRepository};
use crate::CoreError;

/// Days ahead of travel that reminders go out.
pub const LEAD_DAYS: i64 = 2;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderRun {
    pub request_reminders: usize,
    pub reservation_reminders: usize,
    pub failed: usize,
}

/// Enqueues reminders for everything travelling `LEAD_DAYS` after `today`:
/// pending flight requests and confirmed reservations. A failed enqueue is
/// logged and counted; the scan carries on.
pub async fn enqueue_due_reminders(
    requests: &dyn FlightRequestRepository,
    reservations: &dyn ReservationRepository,
    queue: &dyn TaskQueue,
    today: NaiveDate,
) -> Result<ReminderRun, CoreError> {
    let travel_date = today + Duration::days(LEAD_DAYS);
    let mut run = ReminderRun::default();

    for request in requests.pending_for_travel_date(travel_date).await? {
        let task = NotificationTask::FlightRequestReminder {
            request_id: request.id,
        };
        match queue.enqueue(task).await {
            Ok(()) => run.request_reminders += 1,
            Err(e) => {
                warn!(request_id = request.id, error = %e, "failed to enqueue request reminder");
                run.failed += 1;
            }
        }
    }

    for reservation in reservations.confirmed_for_travel_date(travel_date).await? {
        let task = NotificationTask::FlightReminder {
            reservation_id: reservation.id,
        };
        match queue.enqueue(task).await {
            Ok(()) => run.reservation_reminders += 1,
            Err(e) => {
                warn!(reservation_id = reservation.id, error = %e, "failed to enqueue flight reminder");
                run.failed += 1;
            }
        }
    }

    info!(
        %travel_date,
        requests = run.request_reminders,
        reservations = run.reservation_reminders,
        failed = run.failed,
        "reminder scan finished"
    );
    Ok(run)
}
