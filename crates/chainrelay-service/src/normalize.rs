//! RawChainEvent → CanonicalRequest for one subscription.

use chainrelay_codec::decode_runlog;
use chainrelay_core::error::DecodeError;
use chainrelay_core::jobid::{matches_job_id, topic_matches_job_id};
use chainrelay_core::{CanonicalRequest, RawChainEvent};

/// The request `event` carries for `job_id`.
///
/// `Ok(None)` when the event's own job id belongs to another job; several
/// jobs may share one feed. Decode errors are permanent for that event.
pub fn normalize(job_id: &str, event: RawChainEvent) -> Result<Option<CanonicalRequest>, DecodeError> {
    match event {
        RawChainEvent::Log(log) => {
            let matches = log
                .job_topic()
                .is_some_and(|topic| topic_matches_job_id(topic, job_id));
            if !matches {
                return Ok(None);
            }
            decode_runlog(&log.data, &log.address).map(Some)
        }
        RawChainEvent::Request(request) => {
            if matches_job_id(job_id, &request.job_id) {
                Ok(Some(request.fields))
            } else {
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainrelay_core::jobid::job_id_topic;
    use chainrelay_core::{LogEvent, StructuredRequest};

    fn log(job_id: &str, data: Vec<u8>) -> RawChainEvent {
        RawChainEvent::Log(LogEvent {
            address: "0xoracle".into(),
            topics: vec!["0xd8d7".into(), job_id_topic(job_id)],
            data,
            position: Some(1),
        })
    }

    #[test]
    fn log_for_other_job_is_dropped() {
        assert_eq!(normalize("job-1", log("job-2", vec![0; 300])).unwrap(), None);
    }

    #[test]
    fn short_log_is_a_decode_error() {
        assert!(matches!(
            normalize("job-1", log("job-1", vec![0; 10])),
            Err(DecodeError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn log_without_job_topic_is_dropped() {
        let event = RawChainEvent::Log(LogEvent {
            address: "0xoracle".into(),
            topics: vec!["0xd8d7".into()],
            data: vec![],
            position: None,
        });
        assert_eq!(normalize("job-1", event).unwrap(), None);
    }

    #[test]
    fn structured_requests_match_on_embedded_id() {
        let fields: CanonicalRequest = [("get", "https://a.io")].into_iter().collect();
        let event = |job: &str| {
            RawChainEvent::Request(StructuredRequest {
                job_id: job.into(),
                fields: fields.clone(),
            })
        };
        assert_eq!(normalize("job-1", event("job-1")).unwrap(), Some(fields.clone()));
        assert_eq!(normalize("job-1", event("job-10")).unwrap(), None);
    }
}
