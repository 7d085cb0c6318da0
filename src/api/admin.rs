use log::info;
use rocket::{http::Status, serde::json::Json, Route, State};

use crate::engine::{Engine, ResultRow};
use crate::error::{Error, Result};
use crate::model::{
    api::{
        admin::AdminCredentials,
        auth::AuthToken,
        candidate::{CandidateDesc, CandidateSpec},
        voter::{VoterDesc, VoterSpec},
    },
    db::{Admin, Voter},
};
use crate::store::{AdminDeletion, Transition};

pub fn routes() -> Vec<Route> {
    routes![
        start_election,
        end_election,
        get_results,
        get_voters,
        create_voter,
        delete_voter,
        get_candidates,
        create_candidate,
        get_admins,
        create_admin,
        delete_admin,
    ]
}

#[post("/election/start")]
pub async fn start_election(token: AuthToken<Admin>, engine: &State<Engine>) -> Result<()> {
    engine.set_election_active(true).await?;
    info!("Admin {} started the election", token.id);
    Ok(())
}

#[post("/election/end")]
pub async fn end_election(token: AuthToken<Admin>, engine: &State<Engine>) -> Result<()> {
    engine.set_election_active(false).await?;
    info!("Admin {} ended the election", token.id);
    Ok(())
}

#[get("/results")]
pub async fn get_results(
    _token: AuthToken<Admin>,
    engine: &State<Engine>,
) -> Result<Json<Vec<ResultRow>>> {
    Ok(Json(engine.results().await?))
}

#[get("/voters")]
pub async fn get_voters(
    _token: AuthToken<Admin>,
    engine: &State<Engine>,
) -> Result<Json<Vec<VoterDesc>>> {
    let voters = engine.store().voters().await?;
    Ok(Json(voters.into_iter().map(VoterDesc::from).collect()))
}

/// Enrol a voter. The group defaults to the enrolling admin.
#[post("/voters", data = "<spec>", format = "json")]
pub async fn create_voter(
    token: AuthToken<Admin>,
    spec: Json<VoterSpec>,
    engine: &State<Engine>,
) -> Result<Json<VoterDesc>> {
    let spec = spec.0;
    let voter_id = spec.voter_id.trim();
    if voter_id.is_empty() {
        return Err(Error::Status(
            Status::BadRequest,
            "Voter ID must not be empty".to_string(),
        ));
    }

    let voter = Voter::new(voter_id.to_string(), spec.group.or(Some(token.id)));
    engine.store().insert_voter(voter.clone()).await?;
    Ok(Json(voter.into()))
}

/// Remove a voter who has not voted and is not voting.
#[delete("/voters/<voter_id>")]
pub async fn delete_voter(
    _token: AuthToken<Admin>,
    voter_id: &str,
    engine: &State<Engine>,
) -> Result<()> {
    match engine.store().delete_voter(voter_id).await? {
        Transition::Applied => Ok(()),
        Transition::Missing => Err(Error::not_found(format!("Voter {voter_id}"))),
        Transition::Observed(status) => Err(Error::Status(
            Status::Conflict,
            format!("Cannot delete voter {voter_id}, who is {status}"),
        )),
    }
}

#[get("/candidates")]
pub async fn get_candidates(
    _token: AuthToken<Admin>,
    engine: &State<Engine>,
) -> Result<Json<Vec<CandidateDesc>>> {
    let candidates = engine.store().candidates().await?;
    Ok(Json(candidates.into_iter().map(CandidateDesc::from).collect()))
}

#[post("/candidates", data = "<spec>", format = "json")]
pub async fn create_candidate(
    _token: AuthToken<Admin>,
    spec: Json<CandidateSpec>,
    engine: &State<Engine>,
) -> Result<Json<CandidateDesc>> {
    if !spec.is_valid() {
        return Err(Error::Status(
            Status::BadRequest,
            "Candidate name and position must not be empty".to_string(),
        ));
    }
    let candidate = engine.store().insert_candidate(spec.0.into()).await?;
    Ok(Json(candidate.into()))
}

#[get("/admins")]
pub async fn get_admins(
    _token: AuthToken<Admin>,
    engine: &State<Engine>,
) -> Result<Json<Vec<String>>> {
    let admins = engine.store().admins().await?;
    Ok(Json(admins.into_iter().map(|admin| admin.username).collect()))
}

#[post("/admins", data = "<new_admin>", format = "json")]
pub async fn create_admin(
    _token: AuthToken<Admin>,
    new_admin: Json<AdminCredentials>,
    engine: &State<Engine>,
) -> Result<()> {
    let admin: Admin = new_admin
        .0
        .try_into()
        .map_err(|_| Error::Status(Status::BadRequest, "Illegal admin credentials".to_string()))?;
    engine.store().insert_admin(admin).await?;
    Ok(())
}

#[delete("/admins", data = "<username>", format = "json")]
pub async fn delete_admin(
    _token: AuthToken<Admin>,
    username: Json<String>,
    engine: &State<Engine>,
) -> Result<()> {
    match engine.store().delete_admin(&username).await? {
        AdminDeletion::Deleted => Ok(()),
        AdminDeletion::Missing => Err(Error::not_found(format!("Admin {}", username.0))),
        AdminDeletion::LastAdmin => Err(Error::Status(
            Status::UnprocessableEntity,
            "Cannot delete last admin!".to_string(),
        )),
    }
}
