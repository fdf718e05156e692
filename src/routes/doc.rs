use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{
            ForgotPasswordRequest, LoginRequest, LoginResponse, OtpPendingResponse,
            RefreshRequest, RefreshResponse, RegisterRequest, ResetPasswordRequest,
            VerifyOtpRequest,
        },
        cart::{AddToCartRequest, CartItemDto, CartView},
        categories::{CategoryList, CreateCategoryRequest, UpdateCategoryRequest},
        orders::{
            CancelOrderRequest, CreateOrderRequest, FeedbackEntry, FeedbackList, OrderFeedbackRequest,
            OrderItemInput, OrderList, OrderWithItems, UpdateOrderStatusRequest,
        },
        products::{
            AdjustStockRequest, CreateProductRequest, LowStockList, ProductDetail, ProductList,
            UpdateProductRequest, UpdateStatusRequest, VariantInput,
        },
        statistics::{DashboardOverview, OrderStatusCounts, StatusCount, Summary},
        users::{ChangePasswordRequest, ToggleStatusRequest, UpdateProfileRequest, UserList},
        wishlist::{AddWishlistRequest, WishlistCheck, WishlistView},
    },
    models::{Category, Order, OrderItem, Product, ProductVariant, User},
    response::{ApiResponse, Meta},
    routes::{
        auth, cart, categories, health, orders, products as product_routes, statistics, users,
        wishlist,
    },
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::verify_otp_register,
        auth::forgot_password,
        auth::verify_otp_reset,
        auth::login,
        auth::refresh,
        product_routes::list_products,
        product_routes::create_product,
        product_routes::get_product,
        product_routes::update_product,
        product_routes::delete_product,
        product_routes::update_status,
        product_routes::list_low_stock,
        product_routes::adjust_stock,
        categories::list_categories,
        categories::create_category,
        categories::get_category,
        categories::update_category,
        categories::delete_category,
        categories::update_status,
        cart::get_cart,
        cart::add_to_cart,
        cart::remove_from_cart,
        cart::clear_cart,
        orders::create_order,
        orders::list_my_orders,
        orders::list_all_orders,
        orders::get_order,
        orders::update_status,
        orders::cancel_order,
        orders::add_feedback,
        orders::soft_delete_order,
        orders::list_feedbacks,
        users::get_profile,
        users::update_profile,
        users::change_password,
        users::toggle_status,
        users::list_users,
        wishlist::get_wishlist,
        wishlist::add_to_wishlist,
        wishlist::remove_from_wishlist,
        wishlist::check_wishlist,
        statistics::summary,
        statistics::order_status_counts,
        statistics::dashboard_overview
    ),
    components(
        schemas(
            User,
            Category,
            Product,
            ProductVariant,
            Order,
            OrderItem,
            RegisterRequest,
            VerifyOtpRequest,
            OtpPendingResponse,
            ForgotPasswordRequest,
            ResetPasswordRequest,
            LoginRequest,
            LoginResponse,
            RefreshRequest,
            RefreshResponse,
            CreateCategoryRequest,
            UpdateCategoryRequest,
            CategoryList,
            VariantInput,
            CreateProductRequest,
            UpdateProductRequest,
            UpdateStatusRequest,
            AdjustStockRequest,
            ProductDetail,
            ProductList,
            LowStockList,
            AddToCartRequest,
            CartItemDto,
            CartView,
            OrderItemInput,
            CreateOrderRequest,
            UpdateOrderStatusRequest,
            CancelOrderRequest,
            OrderFeedbackRequest,
            OrderWithItems,
            OrderList,
            FeedbackEntry,
            FeedbackList,
            UpdateProfileRequest,
            ChangePasswordRequest,
            ToggleStatusRequest,
            UserList,
            AddWishlistRequest,
            WishlistView,
            WishlistCheck,
            Summary,
            StatusCount,
            OrderStatusCounts,
            DashboardOverview,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductDetail>,
            ApiResponse<ProductList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<CartView>,
            ApiResponse<User>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Registration, OTP verification and login"),
        (name = "Products", description = "Product catalog endpoints"),
        (name = "Categories", description = "Category endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order lifecycle endpoints"),
        (name = "Users", description = "Profile and account endpoints"),
        (name = "Wishlist", description = "Wishlist endpoints"),
        (name = "Statistics", description = "Admin statistics endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
