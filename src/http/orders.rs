use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::models::CreateOrderRequest;
use crate::services::{OrderService, ServiceError};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/order")
            .route("", web::post().to(create_order))
            .route("", web::get().to(list_orders))
            .route("/users", web::get().to(list_replicated_users))
            .route("/{id}", web::get().to(get_order)),
    );
}

async fn create_order(
    service: web::Data<OrderService>,
    request: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, ServiceError> {
    let order = service.create(request.into_inner()).await?;
    Ok(HttpResponse::Ok().json(order))
}

async fn get_order(service: web::Data<OrderService>, id: web::Path<Uuid>) -> Result<HttpResponse, ServiceError> {
    Ok(match service.get(id.into_inner()).await? {
        Some(order) => HttpResponse::Ok().json(order),
        None => HttpResponse::NotFound().finish(),
    })
}

async fn list_orders(service: web::Data<OrderService>) -> Result<HttpResponse, ServiceError> {
    let orders = service.list().await?;
    if orders.is_empty() {
        return Ok(HttpResponse::NotFound().body("No orders found"));
    }
    Ok(HttpResponse::Ok().json(orders))
}

async fn list_replicated_users(service: web::Data<OrderService>) -> Result<HttpResponse, ServiceError> {
    Ok(HttpResponse::Ok().json(service.replicated_users().await?))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::json;

    use super::*;
    use crate::messaging::testing::RecordingSink;
    use crate::messaging::EventProducer;
    use crate::metrics::Metrics;
    use crate::models::{Order, UserReplica};
    use crate::storage::InMemoryStore;

    fn order_service() -> web::Data<OrderService> {
        let producer = EventProducer::new(Arc::new(RecordingSink::default()), Arc::new(Metrics::new().unwrap()));
        web::Data::new(OrderService::new(Arc::new(InMemoryStore::new()), Arc::new(producer)))
    }

    #[actix_web::test]
    async fn test_create_then_list_orders() {
        let app = test::init_service(App::new().app_data(order_service()).configure(configure)).await;
        let user_id = Uuid::new_v4();

        let req = test::TestRequest::post()
            .uri("/api/order")
            .set_json(json!({ "userId": user_id, "product": "Lamp", "quantity": 2, "price": 19.99 }))
            .to_request();
        let created: Order = test::call_and_read_body_json(&app, req).await;
        assert_eq!(created.user_id, user_id);
        assert_eq!(created.quantity, 2);

        let req = test::TestRequest::get()
            .uri(&format!("/api/order/{}", created.id))
            .to_request();
        let fetched: Order = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched, created);

        let req = test::TestRequest::get().uri("/api/order").to_request();
        let listed: Vec<Order> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed.len(), 1);
    }

    #[actix_web::test]
    async fn test_missing_user_id_is_bad_request() {
        let app = test::init_service(App::new().app_data(order_service()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/api/order")
            .set_json(json!({ "product": "Lamp", "quantity": 1, "price": 5.0 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_empty_order_list_is_not_found_but_replicas_are_a_list() {
        let app = test::init_service(App::new().app_data(order_service()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/api/order").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/api/order/users").to_request();
        let replicas: Vec<UserReplica> = test::call_and_read_body_json(&app, req).await;
        assert!(replicas.is_empty());
    }
}
