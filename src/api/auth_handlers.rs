use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    Json as RequestJson,
};
use serde::{Deserialize, Serialize};

use crate::api::gate::bearer_token;
use crate::api::handlers::{internal_error, AppState, ErrorResponse};
use crate::model::{Account, ProfileUpdate, UserContext};
use crate::store::traits::Store;

type ApiError = (StatusCode, Json<ErrorResponse>);

pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: Account,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetConfirm {
    pub token: String,
    pub new_password: String,
}

fn error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(ErrorResponse::new(message)))
}

fn check_password_strength(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(error(
            StatusCode::BAD_REQUEST,
            &format!("password must be at least {} characters", MIN_PASSWORD_LENGTH),
        ));
    }
    Ok(())
}

/// POST /auth/login
pub async fn login<S: Store>(
    State(store): State<AppState<S>>,
    RequestJson(request): RequestJson<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let account = store
        .find_account_by_username(&request.username)
        .await
        .map_err(internal_error)?
        .filter(|account| account.verify_password(&request.password));

    let Some(account) = account else {
        log::warn!("Failed login for {}", request.username);
        return Err(error(StatusCode::UNAUTHORIZED, "invalid username or password"));
    };

    let token = store
        .create_session(&account.id)
        .await
        .map_err(internal_error)?;
    log::info!("{} logged in", account.username);

    Ok(Json(LoginResponse {
        token,
        user: account,
    }))
}

/// POST /auth/logout
pub async fn logout<S: Store>(
    State(store): State<AppState<S>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "authentication required"))?;
    store.delete_session(&token).await.map_err(internal_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn load_own_account<S: Store>(store: &S, caller: &UserContext) -> Result<Account, ApiError> {
    store
        .get_account(&caller.user_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| error(StatusCode::UNAUTHORIZED, "account no longer exists"))
}

/// GET /auth/me
pub async fn get_profile<S: Store>(
    State(store): State<AppState<S>>,
    caller: UserContext,
) -> Result<Json<Account>, ApiError> {
    Ok(Json(load_own_account(&*store, &caller).await?))
}

/// PATCH /auth/me
/// Callers may change their own contact details and password, never their permissions
pub async fn update_profile<S: Store>(
    State(store): State<AppState<S>>,
    caller: UserContext,
    RequestJson(update): RequestJson<ProfileUpdate>,
) -> Result<Json<Account>, ApiError> {
    let mut account = load_own_account(&*store, &caller).await?;

    if let Some(new_password) = &update.new_password {
        let current = update.current_password.as_deref().unwrap_or_default();
        if !account.verify_password(current) {
            return Err(error(StatusCode::FORBIDDEN, "current password is incorrect"));
        }
        check_password_strength(new_password)?;
        account.set_password(new_password);
    }
    if let Some(email) = update.email {
        account.email = Some(email).filter(|e| !e.trim().is_empty());
    }
    if let Some(display_name) = update.display_name {
        account.display_name = Some(display_name).filter(|n| !n.trim().is_empty());
    }

    store
        .upsert_account(account.clone())
        .await
        .map_err(internal_error)?;
    log::info!("{} updated their profile", account.username);
    Ok(Json(account))
}

/// POST /auth/password-reset
/// Always accepted so the response does not reveal which usernames exist
pub async fn request_password_reset<S: Store>(
    State(store): State<AppState<S>>,
    RequestJson(request): RequestJson<PasswordResetRequest>,
) -> Result<StatusCode, ApiError> {
    if let Some(account) = store
        .find_account_by_username(&request.username)
        .await
        .map_err(internal_error)?
    {
        let token = store
            .create_password_reset(&account.id)
            .await
            .map_err(internal_error)?;
        log::info!("Password reset requested for {}", account.username);
        // Delivery belongs to the mail collaborator
        log::debug!("Reset token for {}: {}", account.username, token);
    }
    Ok(StatusCode::ACCEPTED)
}

/// POST /auth/password-reset/confirm
pub async fn confirm_password_reset<S: Store>(
    State(store): State<AppState<S>>,
    RequestJson(request): RequestJson<PasswordResetConfirm>,
) -> Result<StatusCode, ApiError> {
    check_password_strength(&request.new_password)?;

    let invalid = || error(StatusCode::BAD_REQUEST, "reset token is invalid or expired");
    let user_id = store
        .consume_password_reset(&request.token)
        .await
        .map_err(internal_error)?
        .ok_or_else(invalid)?;
    let mut account = store
        .get_account(&user_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(invalid)?;

    account.set_password(&request.new_password);
    store
        .upsert_account(account.clone())
        .await
        .map_err(internal_error)?;
    log::info!("Password reset completed for {}", account.username);
    Ok(StatusCode::NO_CONTENT)
}
