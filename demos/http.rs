use std::{process::ExitCode, sync::Arc, time::Duration};

use barrage::{
    Feed, HttpRequest, HttpStep, LoadSimulation, PingPlugin, PingPluginConfig, Reporter, Response,
    Runner, Scenario, StdoutReporter, Step, WorkerPlugin,
};
use reqwest::Client;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

const BASE_URL: &str = "https://jsonplaceholder.typicode.com";
const RATE: f64 = 100.0;
const DURATION: Duration = Duration::from_secs(5);
const EXPECTED_RPS: f64 = 80.0;
const EXPECTED_P95_MS: f64 = 500.0;

#[derive(Debug, Deserialize)]
struct User {
    id: u64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u64,
    title: String,
}

fn get_user(client: Client, users: Feed<&'static str>) -> Step {
    HttpStep::create("get_user", client, |ctx| {
        let id = ctx.feed_item::<&str>().copied().unwrap_or_default();
        Ok(HttpRequest::get(format!("{BASE_URL}/users?id={id}")))
    })
    .with_check(|res, ctx| {
        let id = ctx.feed_item::<&str>().copied().unwrap_or_default();
        match res.json::<Vec<User>>() {
            // The user goes on to the next step.
            Ok(mut users) if users.len() == 1 => Response::ok_with(users.remove(0)),
            _ => Response::fail(format!("not found user: {id}")),
        }
    })
    .with_feed(users)
    .build()
}

fn get_posts(client: Client) -> Step {
    HttpStep::create("get_posts", client, |ctx| {
        let user = ctx.require_previous::<User>()?;
        Ok(HttpRequest::get(format!("{BASE_URL}/posts?userId={}", user.id)))
    })
    .with_check(|res, ctx| {
        let Some(user) = ctx.previous::<User>() else {
            return Response::fail("no user");
        };
        match res.json::<Vec<Post>>() {
            Ok(posts) if posts.iter().any(|p| p.user_id == user.id) => {
                tracing::trace!("{}: {} posts, first {:?}", user.name, posts.len(), posts[0].title);
                Response::ok()
            }
            _ => Response::fail(format!("not found posts for user: {}", user.id)),
        }
    })
    .build()
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // NEVER instantiate clients inside a step, one pool is shared by every call
    let client = Client::new();
    let users = Feed::random("userFeed", ["1", "2", "3", "4", "5"]).expect("feed is not empty");

    let scenario = Scenario::builder("scenario")
        .step(get_user(client.clone(), users))
        .step(get_posts(client))
        .warm_up(Duration::from_secs(5))
        .load_simulations([LoadSimulation::inject_per_sec(RATE, DURATION)])
        .build()
        .expect("scenario is valid");

    let ping = PingPlugin::new(PingPluginConfig::create_default([BASE_URL]));
    let result = Runner::register_scenarios([scenario])
        .with_worker_plugins([Arc::new(ping) as Arc<dyn WorkerPlugin>])
        .with_test_suite("http")
        .with_test_name("advanced_test")
        .run()
        .await
        .expect("runner is configured");

    let _ = StdoutReporter.report(&result).await;

    let mut ok = true;
    for step in result.all_steps() {
        if step.latency.p95_ms > EXPECTED_P95_MS {
            tracing::error!(
                "{}: p95 {:.1}ms over {EXPECTED_P95_MS}ms",
                step.step_name,
                step.latency.p95_ms
            );
            ok = false;
        }
        if step.rps < EXPECTED_RPS {
            tracing::error!("{}: {:.1} rps under {EXPECTED_RPS}", step.step_name, step.rps);
            ok = false;
        }
    }
    if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
