pub mod api_key;
pub mod identity;
pub mod jwt;
pub mod middleware;
pub mod password;

pub use identity::Identity;
pub use jwt::{Claims, JwtManager};
pub use middleware::{require_admin, require_auth};
pub use password::PasswordService;
