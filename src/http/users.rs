use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::models::CreateUserRequest;
use crate::services::{ServiceError, UserService};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/users")
            .route("", web::post().to(create_user))
            .route("/users", web::get().to(list_users))
            .route("/existing-orders", web::get().to(list_replicated_orders))
            .route("/{id}", web::get().to(get_user)),
    );
}

async fn create_user(
    service: web::Data<UserService>,
    request: web::Json<CreateUserRequest>,
) -> Result<HttpResponse, ServiceError> {
    let user = service.create(request.into_inner()).await?;
    Ok(HttpResponse::Created()
        .insert_header(("Location", format!("/api/users/{}", user.id)))
        .json(user))
}

async fn get_user(service: web::Data<UserService>, id: web::Path<Uuid>) -> Result<HttpResponse, ServiceError> {
    Ok(match service.get(id.into_inner()).await? {
        Some(user) => HttpResponse::Ok().json(user),
        None => HttpResponse::NotFound().finish(),
    })
}

async fn list_users(service: web::Data<UserService>) -> Result<HttpResponse, ServiceError> {
    let users = service.list().await?;
    if users.is_empty() {
        return Ok(HttpResponse::NotFound().body("No cached users found"));
    }
    Ok(HttpResponse::Ok().json(users))
}

async fn list_replicated_orders(service: web::Data<UserService>) -> Result<HttpResponse, ServiceError> {
    let orders = service.replicated_orders().await?;
    if orders.is_empty() {
        return Ok(HttpResponse::NotFound().body("No cached orders found"));
    }
    Ok(HttpResponse::Ok().json(orders))
}
