//! # Router Module
//!
//! Path matching and route resolution.
//!
//! Route patterns use colon parameters (`/users/:userId/orders/:orderId`)
//! and an optional trailing `*` wildcard. At registration each pattern is
//! compiled to a regex; matching scans the table in registration order and
//! the first hit wins, returning the handler name and the extracted path
//! parameters.
//!
//! ## Example
//!
//! ```rust
//! use http::Method;
//! use mayfly::router::{Route, Router};
//! use std::sync::Arc;
//!
//! let routes = vec![Route::new(
//!     Method::GET,
//!     "/users/:userId/orders/:orderId",
//!     Arc::from("GET /users/:userId/orders/:orderId"),
//! )];
//! let router = Router::new(routes);
//!
//! let m = router.route(&Method::GET, "/users/eko/orders/2").unwrap();
//! assert_eq!(m.get_path_param("userId"), Some("eko"));
//! assert_eq!(m.get_path_param("orderId"), Some("2"));
//! ```

mod core;

pub use core::{ParamVec, Route, RouteMatch, Router, MAX_INLINE_PARAMS};
