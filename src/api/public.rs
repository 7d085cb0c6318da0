use rocket::{serde::json::Json, Route, State};

use crate::engine::Engine;
use crate::error::Result;
use crate::model::api::status::ElectionStatus;

pub fn routes() -> Vec<Route> {
    routes![election_status]
}

#[get("/election")]
pub async fn election_status(engine: &State<Engine>) -> Result<Json<ElectionStatus>> {
    let state = engine.store().election_state().await?;
    Ok(Json(state.into()))
}

#[cfg(test)]
mod tests {
    use rocket::{http::Status, local::asynchronous::Client};

    use super::*;

    #[backend_test]
    async fn status_is_public(client: Client) {
        let response = client.get(uri!(election_status)).dispatch().await;
        assert_eq!(Status::Ok, response.status());

        let status: ElectionStatus = response.into_json().await.unwrap();
        assert_eq!(
            status,
            ElectionStatus {
                active: false,
                committed_count: 0,
            }
        );
    }
}
