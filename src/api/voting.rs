use log::info;
use rocket::{http::CookieJar, serde::json::Json, Route, State};

use crate::config::Config;
use crate::engine::{Engine, SessionView};
use crate::error::Result;
use crate::logging::RequestId;
use crate::model::{
    api::{auth::AuthToken, candidate::CandidateDesc, voter::SessionRequest},
    common::CandidateId,
    db::Voter,
};

pub fn routes() -> Vec<Route> {
    routes![
        start_session,
        get_session,
        get_ballot,
        toggle_selection,
        submit_ballot
    ]
}

/// Open a voting session, identifying the voter by admission number.
#[post("/voter/session", data = "<request>", format = "json")]
pub async fn start_session(
    request: Json<SessionRequest>,
    cookies: &CookieJar<'_>,
    engine: &State<Engine>,
    config: &State<Config>,
    id: &RequestId,
) -> Result<Json<SessionView>> {
    let view = engine.start_session(&request.voter_id).await?;
    info!("req{id}: voter {} started a session", view.voter_id);

    let token = AuthToken::<Voter>::for_id(request.0.voter_id);
    cookies.add(token.into_cookie(config));
    Ok(Json(view))
}

#[get("/voter/session")]
pub async fn get_session(
    token: AuthToken<Voter>,
    engine: &State<Engine>,
) -> Result<Json<SessionView>> {
    Ok(Json(engine.session(&token.id).await?))
}

/// The candidates on offer.
#[get("/voter/ballot")]
pub async fn get_ballot(
    _token: AuthToken<Voter>,
    engine: &State<Engine>,
) -> Result<Json<Vec<CandidateDesc>>> {
    let candidates = engine.store().candidates().await?;
    Ok(Json(candidates.into_iter().map(CandidateDesc::from).collect()))
}

/// Select the candidate, or deselect them if already selected.
#[post("/voter/session/selections/<candidate_id>")]
pub async fn toggle_selection(
    token: AuthToken<Voter>,
    candidate_id: CandidateId,
    engine: &State<Engine>,
) -> Result<Json<SessionView>> {
    Ok(Json(engine.select(&token.id, candidate_id).await?))
}

/// Commit the ballot without filling it, or retry a failed commit.
#[post("/voter/session/submit")]
pub async fn submit_ballot(
    token: AuthToken<Voter>,
    engine: &State<Engine>,
    id: &RequestId,
) -> Result<Json<SessionView>> {
    let view = engine.submit(&token.id).await?;
    info!("req{id}: voter {} submitted", token.id);
    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::{Client, LocalResponse},
        serde::json::serde_json::json,
    };

    use super::*;

    use crate::engine::SessionState;
    use crate::model::{
        api::auth::AUTH_TOKEN_COOKIE,
        common::VoterStatus,
        db::NewCandidate,
    };

    /// Enrol voters S1 and S2, register three candidates, and open the election.
    async fn prepare(client: &Client, active: bool) {
        let engine = client.rocket().state::<Engine>().unwrap();
        for voter_id in ["S1", "S2"] {
            engine
                .store()
                .insert_voter(Voter::example(voter_id))
                .await
                .unwrap();
        }
        for name in ["Alice", "Bob", "Carol"] {
            engine
                .store()
                .insert_candidate(NewCandidate::example(name))
                .await
                .unwrap();
        }
        engine.set_election_active(active).await.unwrap();
    }

    async fn start<'c>(client: &'c Client, voter_id: &str) -> LocalResponse<'c> {
        client
            .post(uri!(start_session))
            .header(ContentType::JSON)
            .body(json!({ "voter_id": voter_id }).to_string())
            .dispatch()
            .await
    }

    async fn select<'c>(client: &'c Client, candidate_id: CandidateId) -> LocalResponse<'c> {
        client
            .post(uri!(toggle_selection(candidate_id)))
            .dispatch()
            .await
    }

    async fn voter_status(client: &Client, voter_id: &str) -> VoterStatus {
        let engine = client.rocket().state::<Engine>().unwrap();
        engine.store().voter(voter_id).await.unwrap().unwrap().status
    }

    #[backend_test]
    async fn inactive_election_rejects_session(client: Client) {
        prepare(&client, false).await;

        let response = start(&client, "S1").await;
        assert_eq!(Status::Forbidden, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
        assert_eq!(voter_status(&client, "S1").await, VoterStatus::NotVoted);
    }

    #[backend_test]
    async fn unknown_voter_is_rejected(client: Client) {
        prepare(&client, true).await;

        let response = start(&client, "S99").await;
        assert_eq!(Status::NotFound, response.status());
        assert_eq!(None, client.cookies().get(AUTH_TOKEN_COOKIE));
    }

    #[backend_test]
    async fn full_ballot_is_committed(client: Client) {
        prepare(&client, true).await;

        let response = start(&client, "S1").await;
        assert_eq!(Status::Ok, response.status());
        let view: SessionView = response.into_json().await.unwrap();
        assert_eq!(view.state, SessionState::Open);
        assert_eq!(view.max_selections, 2);
        assert!(client.cookies().get(AUTH_TOKEN_COOKIE).is_some());

        let response = client.get(uri!(get_ballot)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let ballot: Vec<CandidateDesc> = response.into_json().await.unwrap();
        assert_eq!(ballot.len(), 3);
        assert_eq!(ballot[0].name, "Alice");

        let response = select(&client, 1).await;
        assert_eq!(Status::Ok, response.status());
        let response = select(&client, 2).await;
        assert_eq!(Status::Ok, response.status());
        let view: SessionView = response.into_json().await.unwrap();
        assert_eq!(view.state, SessionState::Committed);
        assert_eq!(view.selections, vec![1, 2]);

        // Third selection is over the cap.
        let response = select(&client, 3).await;
        assert_eq!(Status::UnprocessableEntity, response.status());

        let engine = client.rocket().state::<Engine>().unwrap();
        let votes = engine
            .store()
            .candidates()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.votes)
            .collect::<Vec<_>>();
        assert_eq!(votes, vec![1, 1, 0]);
        assert_eq!(voter_status(&client, "S1").await, VoterStatus::Voted);
        assert_eq!(
            engine.store().election_state().await.unwrap().committed_count,
            1
        );

        // Voting again is refused.
        let response = start(&client, "S1").await;
        assert_eq!(Status::Conflict, response.status());
    }

    #[backend_test]
    async fn second_session_is_refused(client: Client) {
        prepare(&client, true).await;

        assert_eq!(Status::Ok, start(&client, "S2").await.status());
        assert_eq!(Status::Conflict, start(&client, "S2").await.status());
        assert_eq!(voter_status(&client, "S2").await, VoterStatus::InSession);
    }

    #[backend_test]
    async fn toggling_and_submitting(client: Client) {
        prepare(&client, true).await;
        start(&client, "S1").await;

        // Empty ballots cannot be submitted.
        let response = client.post(uri!(submit_ballot)).dispatch().await;
        assert_eq!(Status::UnprocessableEntity, response.status());

        select(&client, 3).await;
        let response = select(&client, 3).await;
        let view: SessionView = response.into_json().await.unwrap();
        assert!(view.selections.is_empty());

        let response = select(&client, 1).await;
        let view: SessionView = response.into_json().await.unwrap();
        assert_eq!(view.selections, vec![1]);
        assert_eq!(view.state, SessionState::Open);

        let response = select(&client, 42).await;
        assert_eq!(Status::NotFound, response.status());

        let response = client.post(uri!(submit_ballot)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let view: SessionView = response.into_json().await.unwrap();
        assert_eq!(view.state, SessionState::Committed);
        assert_eq!(view.receipt.unwrap().candidates, vec![1]);

        let response = client.get(uri!(get_session)).dispatch().await;
        let view: SessionView = response.into_json().await.unwrap();
        assert_eq!(view.state, SessionState::Committed);
    }

    #[backend_test]
    async fn voter_routes_need_a_token(client: Client) {
        prepare(&client, true).await;

        let response = client.get(uri!(get_session)).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
        let response = select(&client, 1).await;
        assert_eq!(Status::Unauthorized, response.status());
        let response = client.get(uri!(get_ballot)).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
    }

    #[backend_test(admin)]
    async fn admin_token_is_not_a_voter_token(client: Client) {
        prepare(&client, true).await;

        let response = client.get(uri!(get_ballot)).dispatch().await;
        assert_eq!(Status::Unauthorized, response.status());
    }
}
