use std::time::Duration;

use barrage::{
    Feed, HttpRequest, HttpStep, JsonReporter, LoadSimulation, Reporter, Response, RunResult,
    Runner, RunnerConfig, Scenario, Step,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

#[derive(Debug, Deserialize)]
struct User {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u64,
}

async fn api() -> MockServer {
    let server = MockServer::start().await;
    for id in 1..=3u64 {
        Mock::given(method("GET"))
            .and(path("/users"))
            .and(query_param("id", id.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": id }])))
            .mount(&server)
            .await;
    }
    for id in 1..=2u64 {
        Mock::given(method("GET"))
            .and(path("/posts"))
            .and(query_param("userId", id.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{ "id": 10 * id, "userId": id, "title": "t" }])),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/posts"))
        .and(query_param("userId", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    server
}

fn get_user(base: &str, client: &Client, users: Feed<&'static str>) -> Step {
    let base = base.to_owned();
    HttpStep::create("get_user", client.clone(), move |ctx| {
        let id = ctx.feed_item::<&str>().copied().unwrap_or_default();
        Ok(HttpRequest::get(format!("{base}/users?id={id}")))
    })
    .with_check(|res, ctx| {
        let id = ctx.feed_item::<&str>().copied().unwrap_or_default();
        match res.json::<Vec<User>>() {
            Ok(mut users) if users.len() == 1 => Response::ok_with(users.remove(0)),
            _ => Response::fail(format!("not found user: {id}")),
        }
    })
    .with_feed(users)
    .build()
}

fn get_posts(base: &str, client: &Client) -> Step {
    let base = base.to_owned();
    HttpStep::create("get_posts", client.clone(), move |ctx| {
        let user = ctx.require_previous::<User>()?;
        Ok(HttpRequest::get(format!("{base}/posts?userId={}", user.id)))
    })
    .with_check(|res, ctx| {
        let user = ctx.previous::<User>().map(|u| u.id).unwrap_or_default();
        match res.json::<Vec<Post>>() {
            Ok(posts) if posts.iter().any(|p| p.user_id == user) => Response::ok(),
            _ => Response::fail(format!("not found posts for user: {user}")),
        }
    })
    .build()
}

fn scenario(name: &str, base: &str, client: &Client, users: Feed<&'static str>) -> Scenario {
    Scenario::builder(name)
        .step(get_user(base, client, users))
        .step(get_posts(base, client))
        .warm_up(Duration::from_millis(200))
        .load_simulations([LoadSimulation::inject_per_sec(20.0, Duration::from_secs(1))])
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn users_then_posts_against_a_mock_api() {
    let server = api().await;
    let base = server.uri();
    let client = Client::new();

    let known = Feed::random("users", ["1", "2", "3"]).unwrap();
    let unknown = Feed::sequential("missing", ["9"]).unwrap();
    let config = RunnerConfig::builder()
        .call_timeout(Duration::from_secs(2))
        .drain_grace(Duration::from_secs(5))
        .test_suite("http")
        .test_name("advanced_test")
        .build();

    let result = Runner::register_scenarios([
        scenario("users", &base, &client, known),
        scenario("missing_user", &base, &client, unknown),
    ])
    .with_config(config)
    .run()
    .await
    .unwrap();

    assert_eq!(result.test_suite, "http");
    assert_eq!(result.test_name, "advanced_test");

    let users = result.scenario("users").unwrap();
    assert_eq!(users.iterations_started, 20);
    assert_eq!(users.iterations_dropped, 0);

    let get_user = users.step("get_user").unwrap();
    assert_eq!(get_user.request_count, 20);
    assert_eq!(get_user.ok_count, 20, "{:?}", get_user.failures);
    assert_eq!(get_user.rps, 20.0);

    // Only user 3 has no posts.
    let get_posts = users.step("get_posts").unwrap();
    assert_eq!(get_posts.request_count, 20);
    assert_eq!(get_posts.ok_count + get_posts.fail_count, 20);
    assert!(
        get_posts
            .failures
            .keys()
            .all(|reason| reason == "not found posts for user: 3"),
        "{:?}",
        get_posts.failures
    );

    let missing = result.scenario("missing_user").unwrap();
    let get_user = missing.step("get_user").unwrap();
    assert_eq!(get_user.ok_count, 0);
    assert_eq!(get_user.failures.get("not found user: 9"), Some(&20));
    let get_posts = missing.step("get_posts").unwrap();
    assert_eq!(get_posts.failures.get("no previous output"), Some(&20));

    assert!(result.all_steps().all(|s| s.latency.p95_ms <= 500.0));
    assert!(
        result
            .all_steps()
            .all(|s| s.latency.min_ms <= s.latency.p50_ms && s.latency.p50_ms <= s.latency.max_ms)
    );
}

#[tokio::test]
async fn json_report_round_trips() {
    let server = api().await;
    let client = Client::new();
    let dir = tempfile::tempdir().unwrap();
    let report = dir.path().join("report.json");

    let sc = Scenario::builder("users")
        .step(get_user(&server.uri(), &client, Feed::random("users", ["1"]).unwrap()))
        .load_simulations([LoadSimulation::inject_per_sec(5.0, Duration::from_secs(1))])
        .build()
        .unwrap();
    let result = Runner::register_scenarios([sc]).run().await.unwrap();
    JsonReporter::new(&report).report(&result).await.unwrap();

    let read: RunResult = serde_json::from_slice(&std::fs::read(&report).unwrap()).unwrap();
    assert_eq!(read.scenarios[0].steps[0].ok_count, 5);
    assert_eq!(read.test_suite, result.test_suite);
}
