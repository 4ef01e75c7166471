mod alpha_blend;
mod anim_track;
mod montage;
mod montage_instance;
mod montage_player;
mod pose;
mod root_motion;
mod sequence;
mod slot;
mod time;

pub use alpha_blend::*;
pub use anim_track::*;
pub use montage_instance::*;
pub use montage_player::*;
pub use pose::*;
pub use root_motion::*;
pub use slot::*;
pub use time::*;

#[cfg(test)]
mod time_tests;

#[cfg(test)]
mod alpha_blend_tests;


#[cfg(test)]
mod anim_track_tests;



#[cfg(test)]
mod montage_instance_tests;
