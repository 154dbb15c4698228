use jobfeed_core::{Alert, JobRecord, JobSnapshot, NotificationTask};

/// Evaluates alerts against a freshly persisted batch.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlertMatcher;

impl AlertMatcher {
    pub fn new() -> Self {
        Self
    }

    pub fn matches<'a>(&self, alert: &Alert, jobs: &'a [JobRecord]) -> Vec<&'a JobRecord> {
        if !alert.is_active {
            return Vec::new();
        }
        jobs.iter().filter(|record| alert.filters.matches(&record.job)).collect()
    }

    /// One task per alert with at least one match, in alert order.
    pub fn notifications(&self, alerts: &[Alert], jobs: &[JobRecord]) -> Vec<NotificationTask> {
        alerts
            .iter()
            .filter_map(|alert| {
                let matched = self.matches(alert, jobs);
                if matched.is_empty() {
                    return None;
                }
                Some(NotificationTask {
                    to_email: alert.email.clone(),
                    alert_name: alert.name.clone(),
                    jobs: matched.into_iter().map(JobSnapshot::from).collect(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jobfeed_core::{AlertFilter, CanonicalJob, JobType};

    fn record(id: i64, title: &str, location: Option<&str>, job_type: JobType) -> JobRecord {
        JobRecord {
            id,
            job: CanonicalJob {
                title: title.to_string(),
                company: "Acme Corp".to_string(),
                location: location.map(ToString::to_string),
                job_type,
                description: None,
                apply_url: Some(format!("https://careers.acme.test/jobs/{id}")),
                source: "career_page".to_string(),
                identity_hash: format!("hash-{id}"),
                metadata: Default::default(),
            },
            is_active: true,
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn alert(id: i64, filters: AlertFilter) -> Alert {
        Alert {
            id,
            email: format!("user{id}@example.test"),
            name: format!("alert {id}"),
            filters,
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    fn batch() -> Vec<JobRecord> {
        vec![
            record(1, "Senior Backend Engineer", Some("Remote, US"), JobType::FullTime),
            record(2, "Software Engineering Intern", None, JobType::Internship),
            record(3, "Product Designer", Some("Berlin"), JobType::Contract),
        ]
    }

    #[test]
    fn title_filter_is_case_insensitive_substring() {
        let jobs = batch();
        let matched = AlertMatcher::new().matches(
            &alert(
                1,
                AlertFilter {
                    title: Some("ENGINEER".into()),
                    ..Default::default()
                },
            ),
            &jobs,
        );
        let ids = matched.iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn location_filter_rejects_jobs_without_location() {
        let jobs = batch();
        let matched = AlertMatcher::new().matches(
            &alert(
                1,
                AlertFilter {
                    location: Some("remote".into()),
                    ..Default::default()
                },
            ),
            &jobs,
        );
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, 1);
    }

    #[test]
    fn job_type_is_exact_and_empty_filter_matches_all() {
        let jobs = batch();
        let matcher = AlertMatcher::new();
        let contract = AlertFilter {
            job_type: Some("contract".into()),
            ..Default::default()
        };
        assert_eq!(matcher.matches(&alert(1, contract), &jobs).len(), 1);
        let partial = AlertFilter {
            job_type: Some("full".into()),
            ..Default::default()
        };
        assert!(matcher.matches(&alert(2, partial), &jobs).is_empty());
        assert_eq!(matcher.matches(&alert(3, AlertFilter::default()), &jobs).len(), 3);
    }

    #[test]
    fn notifications_skip_alerts_without_matches_and_inactive_alerts() {
        let jobs = batch();
        let mut paused = alert(3, AlertFilter::default());
        paused.is_active = false;
        let alerts = vec![
            alert(
                1,
                AlertFilter {
                    company: Some("acme".into()),
                    title: Some("designer".into()),
                    ..Default::default()
                },
            ),
            alert(
                2,
                AlertFilter {
                    company: Some("Globex".into()),
                    ..Default::default()
                },
            ),
            paused,
        ];

        let tasks = AlertMatcher::new().notifications(&alerts, &jobs);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].to_email, "user1@example.test");
        assert_eq!(tasks[0].alert_name, "alert 1");
        assert_eq!(tasks[0].jobs.len(), 1);
        assert_eq!(tasks[0].jobs[0].title, "Product Designer");
        assert_eq!(tasks[0].jobs[0].job_type, "contract");
    }
}
