pub mod dokuweb;
pub mod soap;
pub mod xml;
