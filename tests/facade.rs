// tests/facade.rs

use doublefork::error::{Category, Kind, ProcessErrno};
use doublefork::{Error, proc};

#[test]
fn facade_exposes_the_member_crates() {
    assert_ne!(proc::current_pid(), proc::parent_pid());

    let err = Error::posix(13);
    assert_eq!(err.kind(), Kind::Runtime);
    assert_eq!(err.category(), Category::Process);
    assert_eq!(err.code(), ProcessErrno::PosixSystem as u32);
    assert_eq!(err.errno(), Some(13));
}
