use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "MilletMart API",
        description = "Orders, payment gateways and promotions for the MilletMart storefront"
    ),
    paths(
        handlers::orders::create_order,
        handlers::orders::get_order,
        handlers::orders::list_orders,
        handlers::orders::update_order_status,
        handlers::orders::cancel_order,
        handlers::payments::create_razorpay_payment,
        handlers::payments::verify_razorpay_payment,
        handlers::payments::create_phonepe_payment,
        handlers::payments::phonepe_callback,
        handlers::payments::verify_phonepe_payment,
        handlers::payments::phonepe_webhook,
        handlers::payments::create_cashfree_payment,
        handlers::payments::verify_cashfree_payment,
        handlers::payments::cleanup_pending_orders,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        handlers::orders::CreateOrderRequest,
        handlers::orders::UpdateOrderStatusRequest,
        handlers::orders::OrderResponse,
        handlers::payments::CreatePaymentRequest,
        handlers::payments::RazorpayPaymentResponse,
        handlers::payments::RazorpayVerifyRequest,
        handlers::payments::RazorpayVerifyResponse,
        handlers::payments::PhonepePaymentResponse,
        handlers::payments::PhonepeVerifyRequest,
        handlers::payments::PhonepeVerifyResponse,
        handlers::payments::WebhookResponse,
        handlers::payments::CashfreePaymentResponse,
        handlers::payments::CashfreeVerifyRequest,
        handlers::payments::CashfreeVerifyResponse,
        handlers::payments::CleanupResponse,
        crate::gateways::CustomerInfo,
        crate::services::orders::OrderStatus,
    )),
    tags(
        (name = "Orders", description = "Checkout and fulfillment"),
        (name = "Payments", description = "Gateway sessions, verification and cleanup")
    )
)]
pub struct ApiDoc;

/// Swagger UI mounted at /docs, serving the document at /api-docs/openapi.json
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
