//! Repository exports.

mod link_repository;
mod member_repository;
mod run_repository;

pub use link_repository::LinkRepository;
pub use member_repository::MemberRepository;
pub use run_repository::RunRepository;
