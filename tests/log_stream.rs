//! Tests for relaying container logs while a job is awaited.

use std::sync::Arc;
use std::time::Duration;

use clash::cloud::SinkSpec;
use clash::logs::CollectingLogOutput;
use clash::test_support::{CloudCall, FakeCloud, Operation};
use clash::{CloudError, Job, JobConfig, JobError, JobName, LogOutput, LogStreamSession, Messaging};
use rstest::{fixture, rstest};

const PROJECT: &str = "yourproject-foobar";

#[fixture]
fn cloud() -> FakeCloud {
    FakeCloud::new()
}

fn job_for(cloud: &FakeCloud) -> Job {
    Job::from_name(
        JobName::existing("clash-job-logs-1"),
        JobConfig::default(),
        cloud.sdk(),
    )
    .with_pull_timeout(Duration::from_millis(20))
}

fn log_topic() -> String {
    format!("projects/{PROJECT}/topics/clash-job-logs-1-logs")
}

fn log_subscription() -> String {
    format!("projects/{PROJECT}/subscriptions/clash-job-logs-1-logs")
}

fn expected_sink() -> SinkSpec {
    SinkSpec {
        name: String::from("clash-job-logs-1"),
        filter: format!(
            "resource.type=\"global\"\n\
             logName=\"projects/{PROJECT}/logs/gcplogs-docker-driver\"\n\
             jsonPayload.instance.name=\"clash-job-logs-1\""
        ),
        destination: format!("pubsub.googleapis.com/{}", log_topic()),
    }
}

#[rstest]
#[tokio::test]
async fn resources_are_created_and_released_in_order(cloud: FakeCloud) {
    let job = job_for(&cloud);
    let session = LogStreamSession::for_job(&job);

    session
        .run(|| async { Ok::<(), JobError>(()) })
        .await
        .unwrap_or_else(|err| panic!("session should succeed: {err}"));

    assert_eq!(
        cloud.calls(),
        [
            CloudCall::CreateTopic(log_topic()),
            CloudCall::CreateSink {
                project: String::from(PROJECT),
                sink: expected_sink(),
            },
            CloudCall::CreateSubscription {
                subscription: log_subscription(),
                topic: log_topic(),
            },
            CloudCall::Subscribe(log_subscription()),
            CloudCall::Unsubscribe(log_subscription()),
            CloudCall::DeleteSubscription(log_subscription()),
            CloudCall::DeleteSink {
                project: String::from(PROJECT),
                name: String::from("clash-job-logs-1"),
            },
            CloudCall::DeleteTopic(log_topic()),
        ]
    );
    assert!(cloud.topics().is_empty());
    assert!(cloud.subscriptions().is_empty());
}

#[rstest]
#[tokio::test]
async fn published_entries_reach_the_output(cloud: FakeCloud) {
    let job = job_for(&cloud);
    let output = Arc::new(CollectingLogOutput::new());
    let session =
        LogStreamSession::for_job(&job).with_output(Arc::clone(&output) as Arc<dyn LogOutput>);
    let messaging = cloud.sdk().messaging();
    let topic = session.log_topic();

    session
        .run(|| async move {
            messaging
                .publish(&topic, br#"{"jsonPayload": {"data": "step 1 done\n"}}"#)
                .await
                .map_err(JobError::Messaging)?;
            Ok::<(), JobError>(())
        })
        .await
        .unwrap_or_else(|err| panic!("session should succeed: {err}"));

    assert_eq!(output.lines(), [String::from("step 1 done")]);
}

#[rstest]
#[tokio::test]
async fn body_error_still_tears_everything_down(cloud: FakeCloud) {
    let job = job_for(&cloud);
    let session = LogStreamSession::for_job(&job);

    let err = session
        .run(|| async {
            Err::<(), JobError>(JobError::NoStatus {
                job: String::from("clash-job-logs-1"),
                waited_secs: 1,
            })
        })
        .await
        .expect_err("body error should surface");

    assert!(matches!(err, JobError::NoStatus { .. }), "unexpected error: {err:?}");
    for call in [
        CloudCall::Unsubscribe(log_subscription()),
        CloudCall::DeleteSubscription(log_subscription()),
        CloudCall::DeleteTopic(log_topic()),
    ] {
        assert_eq!(cloud.count(|seen| seen == &call), 1, "missing {call:?}");
    }
    assert_eq!(
        cloud.count(|call| matches!(call, CloudCall::DeleteSink { .. })),
        1
    );
}

#[rstest]
#[tokio::test]
async fn sink_failure_releases_topic_only(cloud: FakeCloud) {
    let failure = CloudError::Config(String::from("permission denied"));
    cloud.fail_on(Operation::CreateSink, failure.clone());
    let job = job_for(&cloud);
    let session = LogStreamSession::for_job(&job);

    let err = session
        .run(|| async { Ok::<(), JobError>(()) })
        .await
        .expect_err("sink failure should surface");

    assert_eq!(err, JobError::Logging(failure));
    assert_eq!(
        cloud.count(|call| matches!(call, CloudCall::CreateSubscription { .. })),
        0
    );
    assert_eq!(cloud.calls().last(), Some(&CloudCall::DeleteTopic(log_topic())));
}

#[rstest]
#[tokio::test]
async fn logs_are_relayed_around_attach(cloud: FakeCloud) {
    let mut job = job_for(&cloud);
    cloud.seed_topic(format!("projects/{PROJECT}/topics/clash-job-logs-1"));
    cloud.queue_message(
        format!("projects/{PROJECT}/subscriptions/clash-job-logs-1"),
        br#"{"status": 0}"#.as_slice(),
    );
    let session = LogStreamSession::for_job(&job);
    let attaching = &mut job;

    let status = session
        .run(move || attaching.attach())
        .await
        .unwrap_or_else(|err| panic!("attach with logs should succeed: {err}"));

    assert!(status.is_success());
    assert!(job.status().is_some());
    let calls = cloud.calls();
    let position = |wanted: &CloudCall| calls.iter().position(|call| call == wanted);
    let subscribed = position(&CloudCall::Subscribe(log_subscription()));
    let status_deleted = position(&CloudCall::DeleteSubscription(format!(
        "projects/{PROJECT}/subscriptions/clash-job-logs-1"
    )));
    let unsubscribed = position(&CloudCall::Unsubscribe(log_subscription()));
    assert!(subscribed < status_deleted && status_deleted < unsubscribed, "calls: {calls:?}");
}
