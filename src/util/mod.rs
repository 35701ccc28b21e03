pub mod timer;
pub mod vec3;
